use std::path::PathBuf;

const USAGE: &str = "usage: slq [--config <sources.json>] '<query>'
       slq [--config <sources.json>] --add <@handle> <location>";

enum Command {
    Query(String),
    Add { handle: String, location: String },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(Option<PathBuf>, Command), String> {
    let mut config = None;
    let mut command = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or_else(|| format!("--config needs a path\n{}", USAGE))?;
                config = Some(PathBuf::from(path));
            }
            "--add" if command.is_none() => {
                let (Some(handle), Some(location)) = (args.next(), args.next()) else {
                    return Err(format!("--add needs a handle and a location\n{}", USAGE));
                };
                command = Some(Command::Add { handle, location });
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            _ if command.is_none() => command = Some(Command::Query(arg)),
            _ => return Err(format!("unexpected argument {:?}\n{}", arg, USAGE)),
        }
    }
    let command = command.ok_or_else(|| USAGE.to_string())?;
    Ok((config, command))
}

#[tokio::main]
async fn main() {
    slq::init_logging();

    let (config, command) = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };
    let config = config.unwrap_or_else(slq::config::sources_path);
    log::debug!("sources file: {}", config.display());

    let result = match command {
        Command::Query(query) => slq::run(&config, &query, std::io::stdout()).await,
        Command::Add { handle, location } => slq::config::add_source(&config, &handle, &location).map(|src| {
            println!("{}", src);
        }),
    };
    if let Err(e) = result {
        eprintln!("slq: {}", e);
        std::process::exit(1);
    }
}
