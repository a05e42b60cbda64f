//! Fixed-width binary record layouts for the species catalog and the trainer file.
//!
//! On disk every record occupies exactly [`SpeciesRecord::SIZE`] or
//! [`TrainerRecord::SIZE`] bytes: integers are little-endian, strings are
//! fixed-length zero-padded byte arrays. JSON (serde) is used only on the wire
//! when replying to clients; the binary layout is canonical.

use crate::error::{PokedexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// maximum logical length of a trainer name (the 16th byte stays zero)
pub const TRAINER_NAME_MAX: usize = 15;

/// number of team slots in a trainer record
pub const TEAM_SLOTS: usize = 6;

fn put_str(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn get_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn get_opt_str(buf: &[u8]) -> Option<String> {
    if buf[0] == 0 {
        None
    } else {
        Some(get_str(buf))
    }
}

/// One immutable entry of the species catalog.
///
/// The catalog file is a dense array of these, 1-based ids in slot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesRecord {
    /// 1-based catalog id
    pub id: u16,
    /// species name, at most 11 bytes on disk
    pub name: String,
    /// primary type
    pub type1: String,
    /// secondary type, absent for mono-typed species
    pub type2: Option<String>,
    /// hit points base stat
    pub hp: u8,
    /// attack base stat
    pub attack: u8,
    /// defense base stat
    pub defense: u8,
    /// special attack base stat
    pub sp_atk: u8,
    /// special defense base stat
    pub sp_def: u8,
    /// speed base stat
    pub speed: u8,
    /// generation the species was introduced in
    pub generation: u8,
    /// whether the species is legendary
    pub is_legendary: bool,
    /// predominant color
    pub color: String,
    /// whether the species has a gender at all
    pub has_gender: bool,
    /// probability of being male in eighths (0..=8); meaningless without a gender
    pub pr_male: u8,
    /// first egg group
    pub egg_group1: String,
    /// second egg group, may be absent
    pub egg_group2: Option<String>,
    /// whether the species has a mega evolution
    pub has_mega_evo: bool,
    /// height in centimeters
    pub height_cm: u16,
    /// weight in hectograms
    pub weight_hg: u16,
    /// catch rate
    pub catch_rate: u8,
    /// body style descriptor
    pub body_style: String,
}

impl SpeciesRecord {
    /// width of one species record on disk
    pub const SIZE: usize = 96;

    /// byte offset of the name field within a record
    pub const NAME_OFFSET: usize = 2;

    /// width of the name field
    pub const NAME_LEN: usize = 12;

    /// Decodes one record from exactly [`Self::SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<SpeciesRecord> {
        if buf.len() < Self::SIZE {
            return Err(PokedexError::FileCorrupt);
        }
        Ok(SpeciesRecord {
            id: u16::from_le_bytes([buf[0], buf[1]]),
            name: get_str(&buf[2..14]),
            type1: get_str(&buf[14..23]),
            type2: get_opt_str(&buf[23..32]),
            hp: buf[32],
            attack: buf[33],
            defense: buf[34],
            sp_atk: buf[35],
            sp_def: buf[36],
            speed: buf[37],
            generation: buf[38],
            is_legendary: buf[39] != 0,
            color: get_str(&buf[40..47]),
            has_gender: buf[47] != 0,
            pr_male: buf[48],
            egg_group1: get_str(&buf[49..62]),
            egg_group2: get_opt_str(&buf[62..73]),
            has_mega_evo: buf[73] != 0,
            height_cm: u16::from_le_bytes([buf[74], buf[75]]),
            weight_hg: u16::from_le_bytes([buf[76], buf[77]]),
            catch_rate: buf[78],
            body_style: get_str(&buf[79..96]),
        })
    }

    /// Encodes this record into its fixed on-disk layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        put_str(&mut buf[2..14], &self.name);
        put_str(&mut buf[14..23], &self.type1);
        if let Some(type2) = &self.type2 {
            put_str(&mut buf[23..32], type2);
        }
        buf[32] = self.hp;
        buf[33] = self.attack;
        buf[34] = self.defense;
        buf[35] = self.sp_atk;
        buf[36] = self.sp_def;
        buf[37] = self.speed;
        buf[38] = self.generation;
        buf[39] = self.is_legendary as u8;
        put_str(&mut buf[40..47], &self.color);
        buf[47] = self.has_gender as u8;
        buf[48] = self.pr_male;
        put_str(&mut buf[49..62], &self.egg_group1);
        if let Some(egg_group2) = &self.egg_group2 {
            put_str(&mut buf[62..73], egg_group2);
        }
        buf[73] = self.has_mega_evo as u8;
        buf[74..76].copy_from_slice(&self.height_cm.to_le_bytes());
        buf[76..78].copy_from_slice(&self.weight_hg.to_le_bytes());
        buf[78] = self.catch_rate;
        put_str(&mut buf[79..96], &self.body_style);
        buf
    }
}

impl fmt::Display for SpeciesRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, " | Name: {}", self.name)?;
        writeln!(f, " | Type 1: {}", self.type1)?;
        match &self.type2 {
            Some(type2) => writeln!(f, " | Type 2: {}", type2)?,
            None => writeln!(f, " | Type 2: N/A")?,
        }
        let total = self.hp as u16
            + self.attack as u16
            + self.defense as u16
            + self.sp_atk as u16
            + self.sp_def as u16
            + self.speed as u16;
        writeln!(f, " | Total: {}", total)?;
        writeln!(
            f,
            " | -  HP: {} | Attack: {} | Defense: {}",
            self.hp, self.attack, self.defense
        )?;
        writeln!(
            f,
            " | -  Special attack: {} | Special defense: {}",
            self.sp_atk, self.sp_def
        )?;
        writeln!(f, " | -  Speed: {}", self.speed)?;
        writeln!(f, " | Generation: {}", self.generation)?;
        writeln!(f, " | Is legendary?: {}", self.is_legendary)?;
        writeln!(f, " | Color: {}", self.color)?;
        writeln!(f, " | Has gender?: {}", self.has_gender)?;
        if self.has_gender {
            writeln!(f, " | Prob. being male: {:.3}", self.pr_male as f32 / 8.0)?;
        } else {
            writeln!(f, " | Prob. being male: N/A")?;
        }
        writeln!(f, " | Egg Group 1: {}", self.egg_group1)?;
        match &self.egg_group2 {
            Some(egg_group2) => writeln!(f, " | Egg Group 2: {}", egg_group2)?,
            None => writeln!(f, " | Egg Group 2: N/A")?,
        }
        writeln!(f, " | Has mega evolution?: {}", self.has_mega_evo)?;
        writeln!(
            f,
            " | Height (m): {:.2} | Weight (kg): {:.1}",
            self.height_cm as f32 / 100.0,
            self.weight_hg as f32 / 10.0
        )?;
        writeln!(f, " | Catch rate: {}", self.catch_rate)?;
        writeln!(f, " | Body style: {}", self.body_style)
    }
}

/// One of the six team slots of a trainer record. An empty slot has id 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesSlot {
    /// catalog id of the assigned species, 0 when the slot is empty
    pub id: u16,
    /// species name copied from the catalog at assignment time
    pub name: String,
}

impl SpeciesSlot {
    const SIZE: usize = 14;

    fn decode(buf: &[u8]) -> SpeciesSlot {
        SpeciesSlot {
            id: u16::from_le_bytes([buf[0], buf[1]]),
            name: get_str(&buf[2..14]),
        }
    }

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        put_str(&mut buf[2..14], &self.name);
    }
}

/// A mutable trainer record: a name fixed at creation and up to six species.
///
/// The slot at file offset `(id - 1) * SIZE` stores either this id or 0
/// (logically deleted or never used) — never any other value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerRecord {
    /// 1-based trainer id, assigned at append time and never reused
    pub id: u16,
    /// trainer name, at most 15 bytes, immutable after creation
    pub name: String,
    /// the six team slots; unassigned slots have id 0
    pub team: [SpeciesSlot; TEAM_SLOTS],
}

impl TrainerRecord {
    /// width of one trainer record on disk
    pub const SIZE: usize = 102;

    /// Decodes one record from exactly [`Self::SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<TrainerRecord> {
        if buf.len() < Self::SIZE {
            return Err(PokedexError::FileCorrupt);
        }
        let team = std::array::from_fn(|slot| {
            let at = 18 + slot * SpeciesSlot::SIZE;
            SpeciesSlot::decode(&buf[at..at + SpeciesSlot::SIZE])
        });
        Ok(TrainerRecord {
            id: u16::from_le_bytes([buf[0], buf[1]]),
            name: get_str(&buf[2..18]),
            team,
        })
    }

    /// Encodes this record into its fixed on-disk layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        put_str(&mut buf[2..18], &self.name);
        for (slot, entry) in self.team.iter().enumerate() {
            let at = 18 + slot * SpeciesSlot::SIZE;
            entry.encode_into(&mut buf[at..at + SpeciesSlot::SIZE]);
        }
        buf
    }
}

impl fmt::Display for TrainerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, " | Name: {}", self.name)?;
        writeln!(f, " | Species IDs:")?;
        for slot in &self.team {
            if slot.id == 0 {
                break;
            }
            writeln!(f, "   | {} ({})", slot.id, slot.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_species() -> SpeciesRecord {
        SpeciesRecord {
            id: 25,
            name: "Pikachu".to_string(),
            type1: "Electric".to_string(),
            type2: None,
            hp: 35,
            attack: 55,
            defense: 40,
            sp_atk: 50,
            sp_def: 50,
            speed: 90,
            generation: 1,
            is_legendary: false,
            color: "Yellow".to_string(),
            has_gender: true,
            pr_male: 4,
            egg_group1: "Field".to_string(),
            egg_group2: Some("Fairy".to_string()),
            has_mega_evo: false,
            height_cm: 40,
            weight_hg: 60,
            catch_rate: 190,
            body_style: "quadruped".to_string(),
        }
    }

    fn sample_trainer() -> TrainerRecord {
        let mut team: [SpeciesSlot; TEAM_SLOTS] = Default::default();
        team[0] = SpeciesSlot {
            id: 25,
            name: "Pikachu".to_string(),
        };
        team[1] = SpeciesSlot {
            id: 6,
            name: "Charizard".to_string(),
        };
        TrainerRecord {
            id: 1,
            name: "Ash".to_string(),
            team,
        }
    }

    #[test]
    fn species_codec_round_trips() {
        let rec = sample_species();
        let bytes = rec.encode();
        let decoded = SpeciesRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, rec);
        // the binary image is stable: re-encoding reproduces the same bytes
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn trainer_codec_round_trips() {
        let rec = sample_trainer();
        let bytes = rec.encode();
        let decoded = TrainerRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn trainer_layout_offsets() {
        let bytes = sample_trainer().encode();
        assert_eq!(bytes.len(), TrainerRecord::SIZE);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 1);
        assert_eq!(&bytes[2..5], b"Ash");
        assert_eq!(bytes[5..18], [0u8; 13]);
        // first slot starts right after the name field
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 25);
        assert_eq!(&bytes[20..27], b"Pikachu");
        // slots three through six are all-zero
        assert_eq!(bytes[46..102], [0u8; 56]);
    }

    #[test]
    fn species_layout_offsets() {
        let bytes = sample_species().encode();
        assert_eq!(bytes.len(), SpeciesRecord::SIZE);
        assert_eq!(&bytes[2..9], b"Pikachu");
        assert_eq!(bytes[23..32], [0u8; 9]); // mono-typed: type2 all-zero
        assert_eq!(u16::from_le_bytes([bytes[74], bytes[75]]), 40);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(SpeciesRecord::decode(&[0u8; SpeciesRecord::SIZE - 1]).is_err());
        assert!(TrainerRecord::decode(&[0u8; TrainerRecord::SIZE - 1]).is_err());
    }

    #[test]
    fn zeroed_trainer_decodes_as_deleted() {
        let rec = TrainerRecord::decode(&[0u8; TrainerRecord::SIZE]).unwrap();
        assert_eq!(rec.id, 0);
        assert!(rec.name.is_empty());
        assert!(rec.team.iter().all(|slot| slot.id == 0));
    }

    #[test]
    fn trainer_json_shape() {
        let json = serde_json::to_string(&sample_trainer()).unwrap();
        let back: TrainerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_trainer());
    }
}
