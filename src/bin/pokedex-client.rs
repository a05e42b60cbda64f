//! The pokedex-client executable connects to a record server and enters a
//! REPL. Supported commands:
//!
//! `get species <id>` — fetch and print one species record
//!
//! `get trainer` — stream and print every live trainer record
//!
//! `get trainer <id>` — fetch and print one trainer record
//!
//! `post trainer <name> <id> [... <id>]` — create a trainer with up to six species
//!
//! `put trainer <id> <id> [... <id>]` — replace a trainer's team
//!
//! `delete trainer <id>` — logically delete a trainer
//!
//! `get log <n>` — print the last n server log lines
//!
//! `help`, `exit`
//!
//! When the server announces shutdown with a `BYE` frame the client answers
//! `EXIT` and leaves the REPL cleanly.

use clap::{crate_version, App, Arg};
use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use pokedex::record::{SpeciesRecord, TrainerRecord};
use pokedex::{frame, PokedexClient, PokedexError, Result};
use std::io::{self, BufRead, Write};
use std::net::TcpStream;
use std::process::exit;
use std::thread;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    host: String,
    port: u16,
}

impl Opt {
    /// validates the command line parameters
    /// # Errors
    /// returns [`PokedexError::Parsing`] if the port is not a number in 10000-65535
    fn build(host: &str, port: &str) -> Result<Opt> {
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
            host: host.to_string(),
            port,
        })
    }
}

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("pokedex-client")
        .version(crate_version!())
        .about("REPL client for the record server")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .help("the server's host IP")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .value_name("PORT")
                .help("the server's port number (10000-65535)")
                .required(true)
                .takes_value(true),
        )
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("host").unwrap(),
        matches.value_of("port").unwrap(),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{:?}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("{:?}", e);
        exit(1);
    }
}

/// frames arriving from the server, as seen by the REPL
enum ServerEvent {
    Reply(String),
    Closed,
}

/// what one REPL iteration decided
enum ReplOutcome {
    Continue,
    Quit,
    ServerClosed,
}

fn run(opt: Opt) -> Result<()> {
    let client = PokedexClient::connect((opt.host.as_str(), opt.port))?;
    println!("Species Record Service REPL");
    println!(
        "Connected to {}:{} | session port {}",
        opt.host,
        opt.port,
        client.session_port()
    );

    let stream = client.into_stream();
    let watcher_stream = stream.try_clone()?;
    let (event_tx, event_rx) = unbounded();
    thread::spawn(move || watch_server(watcher_stream, event_tx));

    let mut writer = stream;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        // a farewell may have arrived while sitting at the prompt
        match event_rx.try_recv() {
            Ok(ServerEvent::Closed) => {
                println!("Warning: server is shutting down, exiting client...");
                return Ok(());
            }
            Ok(ServerEvent::Reply(_)) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(()),
        }

        print!("pokedex> ");
        io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            // CTRL-D
            None => {
                println!();
                let _ = frame::write_frame(&mut writer, b"EXIT");
                return Ok(());
            }
        };

        match repl_once(&line, &mut writer, &event_rx) {
            Ok(ReplOutcome::Continue) => {}
            Ok(ReplOutcome::Quit) => {
                let _ = frame::write_frame(&mut writer, b"EXIT");
                return Ok(());
            }
            Ok(ReplOutcome::ServerClosed) => {
                println!("Warning: server is shutting down, exiting client...");
                return Ok(());
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("For valid options, type 'help'\n");
            }
        }
    }
}

/// Reads every frame the server pushes. Ordinary replies are forwarded to the
/// REPL; a `BYE` farewell is answered with `EXIT` and ends the watcher.
fn watch_server(mut stream: TcpStream, events: Sender<ServerEvent>) {
    loop {
        match frame::read_frame(&mut stream) {
            Ok(payload) => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                if text == "BYE" {
                    let _ = frame::write_frame(&mut stream, b"EXIT");
                    let _ = events.send(ServerEvent::Closed);
                    return;
                }
                if events.send(ServerEvent::Reply(text)).is_err() {
                    return;
                }
            }
            Err(_) => {
                let _ = events.send(ServerEvent::Closed);
                return;
            }
        }
    }
}

/// waits for the next reply frame; `None` means the server went away
fn await_reply(events: &Receiver<ServerEvent>) -> Option<String> {
    match events.recv() {
        Ok(ServerEvent::Reply(text)) => Some(text),
        _ => None,
    }
}

fn send(writer: &mut TcpStream, request: &str) -> Result<()> {
    frame::write_frame(writer, request.as_bytes())
}

fn invalid_request() -> PokedexError {
    PokedexError::StringErr("invalid request, check arguments".to_string())
}

fn server_side_error() -> PokedexError {
    PokedexError::StringErr("error occurred on server-side".to_string())
}

/// checks that a user-supplied id argument is a positive integer
fn check_positive(arg: &str, what: &str) -> Result<()> {
    match arg.parse::<u64>() {
        Ok(0) => Err(PokedexError::StringErr(format!("{} starts at 1", what))),
        Ok(_) => Ok(()),
        Err(_) => Err(PokedexError::StringErr(format!(
            "{} must be an integer",
            what
        ))),
    }
}

fn print_help() {
    println!("Valid options:");
    println!("  exit");
    println!("  help");
    println!("  get species <id>");
    println!("  get trainer");
    println!("  get trainer <id>");
    println!("  post trainer <name> <species 1> [... <species 6>]");
    println!("  put trainer <id> <species 1> [... <species 6>]");
    println!("  delete trainer <id>");
    println!("  get log <n>\n");
}

/// handles one REPL line: validate, send, await and print the reply
fn repl_once(
    line: &str,
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
) -> Result<ReplOutcome> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(ReplOutcome::Continue);
    }

    match words[0] {
        "exit" => Ok(ReplOutcome::Quit),

        "help" => {
            print_help();
            Ok(ReplOutcome::Continue)
        }

        "get" => match words.get(1).copied() {
            Some("species") => get_species(&words, writer, events),
            Some("trainer") => get_trainer(&words, writer, events),
            Some("log") => get_log(&words, writer, events),
            Some(other) => Err(PokedexError::StringErr(format!(
                "'{}' invalid option for get",
                other
            ))),
            None => Err(PokedexError::StringErr(
                "'get' requires at least 1 argument".to_string(),
            )),
        },

        "post" => mutate_trainer(&words, writer, events, Mutation::Post),

        "put" => mutate_trainer(&words, writer, events, Mutation::Put),

        "delete" => delete_trainer(&words, writer, events),

        other => Err(PokedexError::StringErr(format!(
            "'{}' invalid command",
            other
        ))),
    }
}

fn get_species(
    words: &[&str],
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
) -> Result<ReplOutcome> {
    if words.len() != 3 {
        return Err(PokedexError::StringErr(
            "'get species' requires exactly 1 argument <id>: int".to_string(),
        ));
    }
    check_positive(words[2], "species id")?;
    send(writer, &format!("REQ_POKE_ID {}", words[2]))?;

    match await_reply(events) {
        None => Ok(ReplOutcome::ServerClosed),
        Some(reply) => match reply.as_str() {
            "CLIENT_REQ_INVALID" => Err(invalid_request()),
            "SERVER_ERROR" => Err(server_side_error()),
            "OUT_OF_BOUNDS" => Err(PokedexError::SpeciesNotFound),
            json => {
                let record: SpeciesRecord = serde_json::from_str(json)?;
                println!("{}", record);
                Ok(ReplOutcome::Continue)
            }
        },
    }
}

fn get_trainer(
    words: &[&str],
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
) -> Result<ReplOutcome> {
    match words.len() {
        // stream every live trainer
        2 => {
            send(writer, "REQ_TRAINER_ALL")?;
            let first = match await_reply(events) {
                None => return Ok(ReplOutcome::ServerClosed),
                Some(reply) => reply,
            };
            match first.as_str() {
                "CLIENT_REQ_INVALID" => return Err(invalid_request()),
                "SERVER_ERROR" => return Err(server_side_error()),
                "OUT_OF_BOUNDS" => {
                    return Err(PokedexError::StringErr(
                        "there are currently no trainers".to_string(),
                    ))
                }
                "FILE_ERROR" => {
                    return Err(PokedexError::StringErr(
                        "trainer file corrupted".to_string(),
                    ))
                }
                "SENDING" => {}
                unexpected => {
                    return Err(PokedexError::StringErr(format!(
                        "unexpected reply: {}",
                        unexpected
                    )))
                }
            }
            loop {
                match await_reply(events) {
                    None => return Ok(ReplOutcome::ServerClosed),
                    Some(reply) => match reply.as_str() {
                        "SERVER_ERROR" => return Err(server_side_error()),
                        "OUT_OF_BOUNDS" => {
                            return Err(PokedexError::StringErr(
                                "there are currently no trainers".to_string(),
                            ))
                        }
                        "DONE" => return Ok(ReplOutcome::Continue),
                        json => {
                            let record: TrainerRecord = serde_json::from_str(json)?;
                            println!("{}", record);
                        }
                    },
                }
            }
        }
        3 => {
            check_positive(words[2], "trainer id")?;
            send(writer, &format!("REQ_TRAINER_ID {}", words[2]))?;
            match await_reply(events) {
                None => Ok(ReplOutcome::ServerClosed),
                Some(reply) => match reply.as_str() {
                    "CLIENT_REQ_INVALID" => Err(invalid_request()),
                    "SERVER_ERROR" => Err(server_side_error()),
                    "OUT_OF_BOUNDS" => Err(PokedexError::TrainerNotFound),
                    json => {
                        let record: TrainerRecord = serde_json::from_str(json)?;
                        println!("{}", record);
                        Ok(ReplOutcome::Continue)
                    }
                },
            }
        }
        _ => Err(PokedexError::StringErr(
            "'get trainer' expects 0 or 1 argument <id>: int".to_string(),
        )),
    }
}

fn get_log(
    words: &[&str],
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
) -> Result<ReplOutcome> {
    if words.len() != 3 {
        return Err(PokedexError::StringErr(
            "'get log' requires exactly 1 argument <n>: int".to_string(),
        ));
    }
    check_positive(words[2], "argument <n>")?;
    send(writer, &format!("REQ_LOG_FILE {}", words[2]))?;

    match await_reply(events) {
        None => Ok(ReplOutcome::ServerClosed),
        Some(reply) => match reply.as_str() {
            "CLIENT_REQ_INVALID" => Err(invalid_request()),
            "SERVER_ERROR" => Err(server_side_error()),
            text => {
                println!("\nRequested Log Entries");
                println!("{}", text);
                println!("End of Log\n");
                Ok(ReplOutcome::Continue)
            }
        },
    }
}

enum Mutation {
    Post,
    Put,
}

fn mutate_trainer(
    words: &[&str],
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
    mutation: Mutation,
) -> Result<ReplOutcome> {
    let verb = match mutation {
        Mutation::Post => "post",
        Mutation::Put => "put",
    };
    if words.len() < 4 {
        return Err(PokedexError::StringErr(format!(
            "'{}' requires at least 3 arguments - trainer <{}> <species_id> [<species_id> ...]",
            verb,
            if matches!(mutation, Mutation::Post) {
                "name"
            } else {
                "id"
            }
        )));
    }
    if words.len() > 9 {
        return Err(PokedexError::StringErr(format!(
            "'{}' allows max. 6 species",
            verb
        )));
    }
    if words[1] != "trainer" {
        return Err(PokedexError::StringErr(format!(
            "'{}' invalid option for {}",
            words[1], verb
        )));
    }
    if matches!(mutation, Mutation::Put) {
        check_positive(words[2], "trainer id")?;
    }

    let request = match mutation {
        Mutation::Post => format!("POST_TRAINER {}", words[2..].join(" ")),
        Mutation::Put => format!("PUT_TRAINER {}", words[2..].join(" ")),
    };
    send(writer, &request)?;

    let reply = match await_reply(events) {
        None => return Ok(ReplOutcome::ServerClosed),
        Some(reply) => reply,
    };
    match mutation {
        Mutation::Post => match reply.as_str() {
            "CLIENT_REQ_INVALID" => Err(invalid_request()),
            "SERVER_ERROR" => Err(server_side_error()),
            "LONG_NAME" => Err(PokedexError::StringErr(
                "name too long, max 15 characters".to_string(),
            )),
            "BAD_POST" => Err(PokedexError::StringErr(
                "one or more species IDs were not found".to_string(),
            )),
            new_id => {
                println!("Added trainer '{}' to the trainer database", words[2]);
                println!("New trainer ID: {}\n", new_id);
                Ok(ReplOutcome::Continue)
            }
        },
        Mutation::Put => {
            let mut parts = reply.splitn(2, '.');
            match (parts.next().unwrap_or(""), parts.next()) {
                ("CLIENT_REQ_INVALID", _) => Err(invalid_request()),
                ("SERVER_ERROR", _) => Err(server_side_error()),
                ("BAD_PUT", Some(reason)) => Err(PokedexError::StringErr(reason.to_string())),
                ("GOOD_PUT", _) => {
                    println!("Updated trainer ID: {}\n", words[2]);
                    Ok(ReplOutcome::Continue)
                }
                _ => Err(PokedexError::StringErr(format!(
                    "unexpected reply: {}",
                    reply
                ))),
            }
        }
    }
}

fn delete_trainer(
    words: &[&str],
    writer: &mut TcpStream,
    events: &Receiver<ServerEvent>,
) -> Result<ReplOutcome> {
    if words.len() != 3 || words[1] != "trainer" {
        return Err(PokedexError::StringErr(
            "'delete' requires 2 arguments - trainer <id>: int".to_string(),
        ));
    }
    check_positive(words[2], "trainer id")?;
    send(writer, &format!("DEL_TRAINER {}", words[2]))?;

    match await_reply(events) {
        None => Ok(ReplOutcome::ServerClosed),
        Some(reply) => match reply.as_str() {
            "CLIENT_REQ_INVALID" => Err(invalid_request()),
            "OUT_OF_BOUNDS" => Err(PokedexError::TrainerNotFound),
            "DELETED" => {
                println!("Deleted trainer ID: {}\n", words[2]);
                Ok(ReplOutcome::Continue)
            }
            unexpected => Err(PokedexError::StringErr(format!(
                "unexpected reply: {}",
                unexpected
            ))),
        },
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
