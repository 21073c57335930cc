#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;

use std::process;

mod cli;
mod run;

fn main() {
    let args = cli::get_args();
    run::init_logger(args.debug);

    match run::run(&args) {
        Ok(code) => {
            debug!("Command exited with code {}", code);
            process::exit(code);
        }
        Err(err) => {
            error!("{}", err);
            if let managed_process::Error::Timeout { timeout, .. } = &err {
                eprintln!("command timed out after {}", run::human(*timeout));
            }
            process::exit(run::exit_code_for(&err));
        }
    }
}
