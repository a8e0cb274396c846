use clap::Parser;
use statespace::app::{handle_fatal_error, init_logging, AppConfig};
use statespace::cli::{execute_command, Cli};

fn main() {
    let cli = Cli::parse();
    let config = AppConfig::new(cli.verbose).with_format(cli.format);
    init_logging(&config);

    match execute_command(cli.command, &config) {
        Ok(output) => print!("{}", output),
        Err(err) => handle_fatal_error(err, config.verbose),
    }
}
