//! End-to-end tests driving a real server over TCP with temp-file fixtures.

use crossbeam::channel::{bounded, Sender};
use pokedex::record::{SpeciesRecord, TrainerRecord};
use pokedex::{PokedexClient, PokedexServer, RecordStore, ServerLog};
use std::fs::{self, File};
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

const CATALOG_LEN: u16 = 30;

fn catalog_entry(id: u16) -> SpeciesRecord {
    SpeciesRecord {
        id,
        name: format!("SP{:03}", id),
        type1: "Normal".to_string(),
        type2: None,
        hp: 10,
        attack: 10,
        defense: 10,
        sp_atk: 10,
        sp_def: 10,
        speed: 10,
        generation: 1,
        is_legendary: false,
        color: "Gray".to_string(),
        has_gender: true,
        pr_male: 4,
        egg_group1: "Field".to_string(),
        egg_group2: None,
        has_mega_evo: false,
        height_cm: 100,
        weight_hg: 100,
        catch_rate: 45,
        body_style: "bipedal".to_string(),
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Sender<()>,
    handle: JoinHandle<pokedex::Result<()>>,
    trainer_path: PathBuf,
    _dir: TempDir,
}

impl TestServer {
    fn start() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let species_path = dir.path().join("species.bin");
        let mut species = File::create(&species_path).unwrap();
        for id in 1..=CATALOG_LEN {
            species.write_all(&catalog_entry(id).encode()).unwrap();
        }
        species.sync_all().unwrap();

        let trainer_path = dir.path().join("trainers.bin");
        let store = RecordStore::open(&species_path, &trainer_path).unwrap();
        let log = ServerLog::open(&dir.path().join("server.log")).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle =
            thread::spawn(move || PokedexServer::new(store, log).serve(listener, shutdown_rx));

        TestServer {
            addr,
            shutdown: shutdown_tx,
            handle,
            trainer_path,
            _dir: dir,
        }
    }

    fn connect(&self) -> PokedexClient {
        PokedexClient::connect(self.addr).unwrap()
    }

    fn trainer_file_len(&self) -> u64 {
        fs::metadata(&self.trainer_path).unwrap().len()
    }
}

#[test]
fn post_creates_the_first_trainer() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.request("POST_TRAINER Ash 25 6 9").unwrap(), "1");
    assert_eq!(server.trainer_file_len(), TrainerRecord::SIZE as u64);

    let json = client.request("REQ_TRAINER_ID 1").unwrap();
    let record: TrainerRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.name, "Ash");
    let ids: Vec<u16> = record.team.iter().map(|slot| slot.id).collect();
    assert_eq!(ids, vec![25, 6, 9, 0, 0, 0]);
    assert_eq!(record.team[0].name, "SP025");

    client.exit().unwrap();
}

#[test]
fn deleted_trainers_are_gone_and_ids_are_not_reused() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.request("POST_TRAINER Ash 25").unwrap(), "1");
    assert_eq!(client.request("DEL_TRAINER 1").unwrap(), "DELETED");
    assert_eq!(client.request("REQ_TRAINER_ID 1").unwrap(), "OUT_OF_BOUNDS");
    // the slot stays allocated, so the file did not shrink
    assert_eq!(server.trainer_file_len(), TrainerRecord::SIZE as u64);

    assert_eq!(client.request("POST_TRAINER Red 1").unwrap(), "2");
    assert_eq!(client.request("DEL_TRAINER 1").unwrap(), "OUT_OF_BOUNDS");
}

#[test]
fn stream_all_skips_deleted_records() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.request("POST_TRAINER Ash 25").unwrap();
    client.request("POST_TRAINER Red 1 2").unwrap();
    client.request("DEL_TRAINER 1").unwrap();

    let mut streamed = Vec::new();
    let status = client
        .stream_all(|json| {
            let record: TrainerRecord = serde_json::from_str(&json).unwrap();
            streamed.push((record.id, record.name));
        })
        .unwrap();
    assert_eq!(status, "DONE");
    assert_eq!(streamed, vec![(2, "Red".to_string())]);
}

#[test]
fn stream_all_of_an_empty_file_is_out_of_bounds() {
    let server = TestServer::start();
    let mut client = server.connect();

    let status = client
        .stream_all(|json| panic!("unexpected record frame: {}", json))
        .unwrap();
    assert_eq!(status, "OUT_OF_BOUNDS");
}

#[test]
fn a_fully_deleted_file_streams_nothing() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.request("POST_TRAINER Ash 25").unwrap();
    client.request("DEL_TRAINER 1").unwrap();

    // the file still holds one allocated slot, so the server commits to
    // SENDING before discovering there is nothing live
    let status = client.stream_all(|_| panic!("no live records")).unwrap();
    assert_eq!(status, "OUT_OF_BOUNDS");
}

#[test]
fn overlong_names_are_refused() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(
        client.request("POST_TRAINER ABCDEFGHIJKLMNOP 1").unwrap(),
        "LONG_NAME"
    );
    assert_eq!(server.trainer_file_len(), 0);
}

#[test]
fn unresolvable_species_fail_the_post_without_writing() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.request("POST_TRAINER A 999999").unwrap(), "BAD_POST");
    assert_eq!(
        client
            .request(&format!("POST_TRAINER A {}", CATALOG_LEN + 1))
            .unwrap(),
        "BAD_POST"
    );
    assert_eq!(server.trainer_file_len(), 0);
}

#[test]
fn malformed_requests_are_invalid() {
    let server = TestServer::start();
    let mut client = server.connect();

    assert_eq!(client.request("HELLO").unwrap(), "CLIENT_REQ_INVALID");
    assert_eq!(
        client.request("POST_TRAINER Ash").unwrap(),
        "CLIENT_REQ_INVALID"
    );
    assert_eq!(
        client.request("REQ_POKE_ID 007").unwrap(),
        "CLIENT_REQ_INVALID"
    );
    // the session survives invalid requests
    assert_eq!(client.request("POST_TRAINER Ash 25").unwrap(), "1");
}

#[test]
fn species_reads_come_from_the_catalog() {
    let server = TestServer::start();
    let mut client = server.connect();

    let json = client.request("REQ_POKE_ID 5").unwrap();
    let record: SpeciesRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(record.id, 5);
    assert_eq!(record.name, "SP005");

    assert_eq!(
        client
            .request(&format!("REQ_POKE_ID {}", CATALOG_LEN + 1))
            .unwrap(),
        "OUT_OF_BOUNDS"
    );
}

#[test]
fn put_replaces_the_team_but_not_the_name() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.request("POST_TRAINER Ash 1 2 3 4 5 6").unwrap();
    assert_eq!(client.request("PUT_TRAINER 1 7 8").unwrap(), "GOOD_PUT");

    let json = client.request("REQ_TRAINER_ID 1").unwrap();
    let record: TrainerRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(record.name, "Ash");
    let ids: Vec<u16> = record.team.iter().map(|slot| slot.id).collect();
    assert_eq!(ids, vec![7, 8, 0, 0, 0, 0]);

    assert_eq!(
        client.request("PUT_TRAINER 99 1").unwrap(),
        "BAD_PUT.trainer ID not found"
    );
    assert_eq!(
        client
            .request(&format!("PUT_TRAINER 1 {}", CATALOG_LEN + 1))
            .unwrap(),
        "BAD_PUT.species ID not found"
    );
}

#[test]
fn put_on_a_deleted_trainer_reports_not_found() {
    let server = TestServer::start();
    let mut client = server.connect();

    client.request("POST_TRAINER Ash 1").unwrap();
    client.request("DEL_TRAINER 1").unwrap();
    assert_eq!(
        client.request("PUT_TRAINER 1 2").unwrap(),
        "BAD_PUT.trainer ID not found"
    );
}

#[test]
fn log_requests_answer_even_when_nothing_was_logged() {
    let server = TestServer::start();
    let mut client = server.connect();

    // no subscriber writes into this server's log file during tests
    assert_eq!(client.request("REQ_LOG_FILE 5").unwrap(), "Log file empty.");
}

#[test]
fn sessions_on_separate_connections_interleave() {
    let server = TestServer::start();
    let mut writers: Vec<_> = (0..4)
        .map(|worker| {
            let mut client = server.connect();
            thread::spawn(move || {
                for round in 0..5 {
                    let reply = client
                        .request(&format!("POST_TRAINER W{}R{} {}", worker, round, worker + 1))
                        .unwrap();
                    reply.parse::<u16>().expect("post replies with the new id");
                }
                client
            })
        })
        .collect();
    let clients: Vec<_> = writers.drain(..).map(|h| h.join().unwrap()).collect();
    drop(clients);

    let mut ids = Vec::new();
    let mut reader = server.connect();
    let status = reader
        .stream_all(|json| {
            let record: TrainerRecord = serde_json::from_str(&json).unwrap();
            ids.push(record.id);
        })
        .unwrap();
    assert_eq!(status, "DONE");
    // twenty appends, each with a unique monotonically assigned id
    assert_eq!(ids, (1..=20).collect::<Vec<u16>>());
}

#[test]
fn interrupt_drains_sessions_with_a_farewell() {
    let server = TestServer::start();
    let mut client = server.connect();
    client.request("POST_TRAINER Ash 25").unwrap();

    server.shutdown.send(()).unwrap();
    assert_eq!(client.read_reply().unwrap(), "BYE");
    client.exit().unwrap();

    server.handle.join().unwrap().unwrap();
}

#[test]
fn drain_with_no_sessions_stops_immediately() {
    let server = TestServer::start();
    server.shutdown.send(()).unwrap();
    server.handle.join().unwrap().unwrap();
}
