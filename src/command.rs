//! The textual request grammar spoken inside frames.
//!
//! Requests are matched anchored and exactly; anything else is answered with
//! `CLIENT_REQ_INVALID`. Numeric arguments outside their semantic range are not
//! a parse error — they funnel to id 0, which no live record can carry, and so
//! surface as the relevant not-found status token instead.

use regex::Regex;
use std::sync::LazyLock;

static GET_SPECIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^REQ_POKE_ID ([1-9][0-9]*)$").expect("valid pattern"));
static GET_TRAINER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^REQ_TRAINER_ID ([1-9][0-9]*)$").expect("valid pattern"));
static GET_TRAINER_ALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^REQ_TRAINER_ALL$").expect("valid pattern"));
// each species id is captured individually; absent trailing captures stay empty
static POST_TRAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^POST_TRAINER (\S+) (\d+)(?: (\d+))?(?: (\d+))?(?: (\d+))?(?: (\d+))?(?: (\d+))?$")
        .expect("valid pattern")
});
static PUT_TRAINER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PUT_TRAINER (\d+) (\d+)(?: (\d+))?(?: (\d+))?(?: (\d+))?(?: (\d+))?(?: (\d+))?$")
        .expect("valid pattern")
});
static DEL_TRAINER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^DEL_TRAINER (\d+)$").expect("valid pattern"));
static GET_LOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^REQ_LOG_FILE (\d+)$").expect("valid pattern"));

/// A parsed client request, one per received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// read one species record from the catalog
    GetSpecies {
        /// 1-based catalog id
        id: u16,
    },
    /// read one trainer record
    GetTrainer {
        /// 1-based trainer id
        id: u16,
    },
    /// stream every live trainer record
    GetTrainerAll,
    /// append a new trainer
    PostTrainer {
        /// trainer name, non-space
        name: String,
        /// one to six species ids to assign
        species: Vec<u16>,
    },
    /// replace the team of an existing trainer
    PutTrainer {
        /// 1-based trainer id
        id: u16,
        /// one to six species ids to assign
        species: Vec<u16>,
    },
    /// logically delete a trainer
    DeleteTrainer {
        /// 1-based trainer id
        id: u16,
    },
    /// read the tail of the server log
    GetLog {
        /// number of trailing lines requested
        lines: usize,
    },
    /// end the session
    Exit,
}

/// ids beyond the 16-bit space can never name a live record; 0 never does either
fn narrow_id(digits: &str) -> u16 {
    digits
        .parse::<u64>()
        .ok()
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(0)
}

fn collect_species(captures: &regex::Captures<'_>, from: usize) -> Vec<u16> {
    (from..captures.len())
        .filter_map(|idx| captures.get(idx))
        .map(|m| narrow_id(m.as_str()))
        .collect()
}

impl Request {
    /// Parses one frame of request text. `None` means the frame matched no
    /// valid form and earns a `CLIENT_REQ_INVALID` reply.
    pub fn parse(input: &str) -> Option<Request> {
        if input == "EXIT" {
            return Some(Request::Exit);
        }
        if let Some(captures) = GET_SPECIES.captures(input) {
            return Some(Request::GetSpecies {
                id: narrow_id(&captures[1]),
            });
        }
        if let Some(captures) = GET_TRAINER.captures(input) {
            return Some(Request::GetTrainer {
                id: narrow_id(&captures[1]),
            });
        }
        if GET_TRAINER_ALL.is_match(input) {
            return Some(Request::GetTrainerAll);
        }
        if let Some(captures) = POST_TRAINER.captures(input) {
            return Some(Request::PostTrainer {
                name: captures[1].to_string(),
                species: collect_species(&captures, 2),
            });
        }
        if let Some(captures) = PUT_TRAINER.captures(input) {
            return Some(Request::PutTrainer {
                id: narrow_id(&captures[1]),
                species: collect_species(&captures, 2),
            });
        }
        if let Some(captures) = DEL_TRAINER.captures(input) {
            return Some(Request::DeleteTrainer {
                id: narrow_id(&captures[1]),
            });
        }
        if let Some(captures) = GET_LOG.captures(input) {
            return Some(Request::GetLog {
                lines: captures[1].parse().unwrap_or(usize::MAX),
            });
        }
        None
    }
}
