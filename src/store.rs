//! CRUD over the trainer file and read-only access to the species catalog.
//!
//! Both files are dense arrays of fixed-width records; a record with id `k`
//! lives at offset `(k - 1) * record size`. The trainer file is touched only
//! through positional reads and writes on a shared handle, so operations on
//! disjoint ids never interleave a seek — ordering between operations on the
//! *same* id is the lock manager's job and every method documents the regime
//! it must be called under. The species catalog is immutable for the process
//! lifetime and sits behind its own mutex; post and put hold that mutex for
//! their whole duration, which also serialises competing appends.

use crate::error::{PokedexError, Result};
use crate::locks::relock;
use crate::record::{SpeciesRecord, SpeciesSlot, TrainerRecord, TEAM_SLOTS, TRAINER_NAME_MAX};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

/// File-backed store for the species catalog and the trainer records.
pub struct RecordStore {
    species: Mutex<File>,
    trainers: File,
}

fn species_offset(id: u16) -> u64 {
    (id as u64 - 1) * SpeciesRecord::SIZE as u64
}

fn trainer_offset(id: u16) -> u64 {
    (id as u64 - 1) * TrainerRecord::SIZE as u64
}

fn not_found_on_eof(err: io::Error, not_found: PokedexError) -> PokedexError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        not_found
    } else {
        err.into()
    }
}

fn read_species_name(catalog: &File, id: u16) -> Result<String> {
    if id == 0 {
        return Err(PokedexError::SpeciesNotFound);
    }
    let mut buf = [0u8; SpeciesRecord::NAME_LEN];
    let offset = species_offset(id) + SpeciesRecord::NAME_OFFSET as u64;
    catalog
        .read_exact_at(&mut buf, offset)
        .map_err(|e| not_found_on_eof(e, PokedexError::SpeciesNotFound))?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// resolves every requested species before anything is written
fn build_team(catalog: &File, species: &[u16]) -> Result<[SpeciesSlot; TEAM_SLOTS]> {
    let mut team: [SpeciesSlot; TEAM_SLOTS] = Default::default();
    for (slot, &id) in team.iter_mut().zip(species) {
        let name = read_species_name(catalog, id)?;
        *slot = SpeciesSlot { id, name };
    }
    Ok(team)
}

impl RecordStore {
    /// Opens the species catalog read-only (it must exist) and the trainer
    /// file read-write, creating the latter when absent.
    pub fn open(species_path: &Path, trainer_path: &Path) -> Result<RecordStore> {
        let species = OpenOptions::new().read(true).open(species_path)?;
        let trainers = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(trainer_path)?;
        Ok(RecordStore {
            species: Mutex::new(species),
            trainers,
        })
    }

    /// current trainer file size, refused when it is not a whole number of records
    fn trainer_file_size(&self) -> Result<u64> {
        let size = self.trainers.metadata()?.len();
        if size % TrainerRecord::SIZE as u64 != 0 {
            return Err(PokedexError::FileCorrupt);
        }
        Ok(size)
    }

    /// Number of allocated trainer slots, live or deleted.
    pub fn trainer_count(&self) -> Result<u64> {
        Ok(self.trainer_file_size()? / TrainerRecord::SIZE as u64)
    }

    /// Reads one species record. The catalog is immutable, so no record lock
    /// applies; the catalog mutex keeps concurrent reads from interleaving.
    pub fn species(&self, id: u16) -> Result<SpeciesRecord> {
        if id == 0 {
            return Err(PokedexError::SpeciesNotFound);
        }
        let catalog = relock(&self.species);
        let mut buf = [0u8; SpeciesRecord::SIZE];
        catalog
            .read_exact_at(&mut buf, species_offset(id))
            .map_err(|e| not_found_on_eof(e, PokedexError::SpeciesNotFound))?;
        SpeciesRecord::decode(&buf)
    }

    /// Reads just the name field of one species record.
    pub fn species_name(&self, id: u16) -> Result<String> {
        let catalog = relock(&self.species);
        read_species_name(&catalog, id)
    }

    /// Reads one trainer record. Call under a read lock for `id` (or under
    /// the scan gate). A zero stored id means logically deleted or never
    /// used; both report not found.
    pub fn trainer(&self, id: u16) -> Result<TrainerRecord> {
        if id == 0 {
            return Err(PokedexError::TrainerNotFound);
        }
        let mut buf = [0u8; TrainerRecord::SIZE];
        self.trainers
            .read_exact_at(&mut buf, trainer_offset(id))
            .map_err(|e| not_found_on_eof(e, PokedexError::TrainerNotFound))?;
        let record = TrainerRecord::decode(&buf)?;
        if record.id == 0 {
            return Err(PokedexError::TrainerNotFound);
        }
        Ok(record)
    }

    /// Appends a new trainer and returns its id. Call under the gate's shared
    /// side. Every species id is resolved before the append, so a bad id
    /// leaves the file untouched. Ids grow monotonically and are never
    /// reused; allocation fails once the 16-bit space is exhausted.
    pub fn create_trainer(&self, name: &str, species: &[u16]) -> Result<u16> {
        if name.len() > TRAINER_NAME_MAX {
            return Err(PokedexError::NameTooLong);
        }
        let catalog = relock(&self.species);
        let size = self.trainer_file_size()?;
        let next = size / TrainerRecord::SIZE as u64 + 1;
        if next > u16::MAX as u64 {
            return Err(PokedexError::IdSpaceExhausted);
        }
        let record = TrainerRecord {
            id: next as u16,
            name: name.to_string(),
            team: build_team(&catalog, species)?,
        };
        self.trainers.write_all_at(&record.encode(), size)?;
        self.trainers.sync_all()?;
        Ok(record.id)
    }

    /// Replaces the team of an existing trainer in place, preserving its id
    /// and name; unassigned slots are zeroed. Call under a write lock for
    /// `id`. A logically deleted trainer reports not found — deletion is
    /// terminal for an id.
    pub fn update_trainer(&self, id: u16, species: &[u16]) -> Result<()> {
        let existing = self.trainer(id)?;
        let catalog = relock(&self.species);
        self.trainer_file_size()?;
        let record = TrainerRecord {
            id: existing.id,
            name: existing.name,
            team: build_team(&catalog, species)?,
        };
        self.trainers
            .write_all_at(&record.encode(), trainer_offset(id))?;
        self.trainers.sync_all()?;
        Ok(())
    }

    /// Logically deletes a trainer by zero-filling its slot. Call under a
    /// write lock for `id`. The slot is never reallocated. Durability is
    /// best-effort: no fsync.
    pub fn delete_trainer(&self, id: u16) -> Result<()> {
        self.trainer(id)?;
        self.trainer_file_size()?;
        let blank = [0u8; TrainerRecord::SIZE];
        self.trainers.write_all_at(&blank, trainer_offset(id))?;
        Ok(())
    }

    /// Walks every allocated slot in id order and invokes `visit` for each
    /// live record, skipping deleted ones. Call under the exclusive scan
    /// gate. Returns the number of live records visited.
    pub fn scan_trainers(
        &self,
        mut visit: impl FnMut(TrainerRecord) -> Result<()>,
    ) -> Result<usize> {
        let slots = self.trainer_count()?;
        let mut live = 0;
        let mut buf = [0u8; TrainerRecord::SIZE];
        for slot in 0..slots {
            self.trainers
                .read_exact_at(&mut buf, slot * TrainerRecord::SIZE as u64)?;
            let record = TrainerRecord::decode(&buf)?;
            if record.id == 0 {
                continue;
            }
            visit(record)?;
            live += 1;
        }
        Ok(live)
    }
}
