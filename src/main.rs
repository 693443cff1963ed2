use anyhow::Context;
use int_probe::config::{Config, CONFIG_FILE};

// The probe only ever has one request in flight, so a single-threaded runtime
// is all we need. Phases A and B share the first connection; phase C always
// runs on a new one, whatever happened in phase B.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // We check the arguments before anything else, so a bad invocation only
    // prints the usage line and never touches the config or the network.
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        let program = args.first().map(String::as_str).unwrap_or("int-probe");
        println!("{} ip_addr port", program);
        std::process::exit(1);
    }

    let config = Config::new(CONFIG_FILE).context("Error loading config")?;
    config.init_tracing();

    let host = args[1].clone();
    let port: u16 = args[2]
        .parse()
        .with_context(|| format!("Invalid port {:?}", args[2]))?;

    // Results go to stdout as each phase finishes; if phase A or C fails, the
    // error is returned from main and the process exits with a failure status.
    int_probe::probe::run((host, port), &mut std::io::stdout()).await?;
    Ok(())
}
