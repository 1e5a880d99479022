use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Parser};
use log::{error, info};
use std::path::PathBuf;
use usbmode::config::{Config, DEFAULT_CONFIG_PATH};
use usbmode::device_ids::for_each_match;
use usbmode::mode::Mode;
use usbmode::protocol::Switcher;
use usbmode::usb;

#[derive(Parser, Debug)]
#[command(name = "usbmode", version, about)]
#[command(group(ArgGroup::new("command").required(true).args(["list", "switch"])))]
struct Opt {
    /// List matching devices
    #[arg(short, long)]
    list: bool,

    /// Modeswitch matching devices
    #[arg(short, long)]
    switch: bool,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output (repeat for more)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

fn default_log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> Result<()> {
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        // Usage errors exit with 1 like every other startup failure; --help and --version don't.
        Err(e) if e.use_stderr() => {
            e.print().context("Failed to print usage")?;
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("USBMODE_LOG", default_log_filter(opt.verbose))
            .write_style("USBMODE_LOG_STYLE"),
    )
    .init();

    let config = Config::load(&opt.config).context("Failed to load config file")?;
    info!(
        "Loaded {} device rules from {}",
        config.rule_count(),
        opt.config.display()
    );
    let context = rusb::Context::new().context("Failed to initialize libusb")?;
    let devices = usb::snapshot(&context).context("Failed to list USB devices")?;

    if opt.list {
        for_each_match(&devices, &config, |_, identity, _| {
            eprintln!("Found device: {identity}");
        });
    } else {
        let mut switcher = Switcher::new(&config);
        for_each_match(&devices, &config, |handle, identity, spec| {
            let mode = Mode::select(&spec.mode);
            if let Err(e) = mode.run(&mut switcher, handle, identity, spec) {
                error!("Failed to switch {}: {:#}", identity.id, anyhow::Error::new(e));
            }
        });
    }

    Ok(())
}
