//! scout-shell: the restricted shell run inside each web terminal.

use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::Parser;

use scout_term::shell::{
    install_interrupt_handler, print_banner, InterruptibleInput, ProcessRunner, RestrictedShell,
    DEFAULT_BANNER,
};

#[derive(Parser, Debug)]
#[command(name = "scout-shell")]
#[command(about = "Restricted command shell for the scout web terminal")]
struct Args {
    /// Directory commands run in
    #[arg(long, env = "SCOUT_SHELL_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Title printed on start
    #[arg(long, default_value = DEFAULT_BANNER)]
    banner: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    install_interrupt_handler()?;

    let input = BufReader::new(InterruptibleInput::new(io::stdin()));
    let mut stdout = io::stdout();

    print_banner(&mut stdout, &args.banner)?;
    let mut shell = RestrictedShell::new(ProcessRunner::new(workdir));
    shell.run(input, &mut stdout)?;
    Ok(())
}
