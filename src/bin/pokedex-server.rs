//! this binary starts the record server
//! to see the list of flags, type: `pokedex-server --help`

use clap::{crate_version, App, Arg};
use crossbeam::channel::bounded;
use pokedex::{logging, PokedexError, PokedexServer, RecordStore, Result, ServerLog};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::exit;
use tracing::info;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    port: u16,
    species: PathBuf,
    trainers: PathBuf,
    log: PathBuf,
}

impl Opt {
    /// validates the command line parameters
    /// # Errors
    /// returns [`PokedexError::Parsing`] if the port is not a number in 10000-65535
    fn build(port: &str, species: &str, trainers: &str, log: &str) -> Result<Opt> {
        let port: u16 = port.parse().map_err(|_| {
            PokedexError::Parsing(format!("could not parse {} into a port number", port))
        })?;
        if port < 10000 {
            return Err(PokedexError::Parsing(format!(
                "port {} is outside the allowed range 10000-65535",
                port
            )));
        }
        Ok(Opt {
            port,
            species: PathBuf::from(species),
            trainers: PathBuf::from(trainers),
            log: PathBuf::from(log),
        })
    }
}

fn main() {
    // parse command line args
    let matches = App::new("pokedex-server")
        .version(crate_version!())
        .about("a multi-threaded record server for a species catalog and trainer rosters")
        .arg(
            Arg::with_name("port")
                .long("port")
                .value_name("PORT")
                .help("sets the port the server listens on (10000-65535)")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("species")
                .long("species")
                .value_name("FILE")
                .help("path of the species catalog binary file (must exist)")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("trainers")
                .long("trainers")
                .value_name("FILE")
                .help("path of the trainer binary file (created when absent)")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .value_name("FILE")
                .help("path of the server log file (created when absent)")
                .required(true)
                .takes_value(true),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("port").unwrap(),
        matches.value_of("species").unwrap(),
        matches.value_of("trainers").unwrap(),
        matches.value_of("log").unwrap(),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    // every tracing event from here on lands in the log file and on stdout
    let log = ServerLog::open(&opt.log)?;
    logging::init(&log);

    let store = RecordStore::open(&opt.species, &opt.trainers)?;
    let listener = TcpListener::bind(("127.0.0.1", opt.port))?;
    info!("pokedex-server {}", env!("CARGO_PKG_VERSION"));
    info!("listening on 127.0.0.1:{}", opt.port);

    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| PokedexError::StringErr(format!("could not install the interrupt handler: {}", e)))?;

    PokedexServer::new(store, log).serve(listener, shutdown_rx)
}
