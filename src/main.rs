use chevron::config::PATH_ENV;
use chevron::{Vm, VmConfig, logging};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const USAGE: &str = "usage: chevron [-I dir]... <file.cr>";

struct Args {
    include: Vec<PathBuf>,
    script: PathBuf,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut include = Vec::new();
    let mut script = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(USAGE.to_string()),
            "-I" => match args.next() {
                Some(dir) => include.push(PathBuf::from(dir)),
                None => return Err(format!("-I needs a directory\n{}", USAGE)),
            },
            _ if arg.starts_with("-I") => include.push(PathBuf::from(&arg[2..])),
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            _ => return Err(format!("unexpected argument '{}'\n{}", arg, USAGE)),
        }
    }
    let script = script.ok_or_else(|| USAGE.to_string())?;
    Ok(Args { include, script })
}

fn main() -> ExitCode {
    logging::init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let source = match fs::read_to_string(&args.script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.script.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let script_dir = args
        .script
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let config = VmConfig::new()
        .search_dirs(args.include)
        .env_search_path(PATH_ENV)
        .search_dir(script_dir);

    let file = args.script.display().to_string();
    let mut vm = Vm::with_config(config);
    match vm.run_source(&source, &file) {
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err);
            if let Err(io_err) = err.pretty_print(&file, &source) {
                tracing::warn!(%io_err, "could not render error report");
            }
            ExitCode::FAILURE
        }
    }
}
