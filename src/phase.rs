//! Benchmark phases
//!
//! A benchmark run is an ordered sequence of phases. Workers detect a phase
//! change by observing a new bench ID in the shared state; the phase code is
//! also what travels over the wire in `/startphase` requests.

use serde::{Deserialize, Serialize};

/// One benchmark phase. The numeric codes are part of the remote-control
/// protocol and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BenchPhase {
    Idle = 0,
    /// Tells workers to self-terminate when all is done.
    Terminate = 1,
    CreateDirs = 2,
    DeleteDirs = 3,
    CreateFiles = 4,
    DeleteFiles = 5,
    ReadFiles = 6,
    StatFiles = 7,
    Sync = 8,
    DropCaches = 9,
}

impl BenchPhase {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Terminate),
            2 => Some(Self::CreateDirs),
            3 => Some(Self::DeleteDirs),
            4 => Some(Self::CreateFiles),
            5 => Some(Self::DeleteFiles),
            6 => Some(Self::ReadFiles),
            7 => Some(Self::StatFiles),
            8 => Some(Self::Sync),
            9 => Some(Self::DropCaches),
            _ => None,
        }
    }

    /// Human name used in result tables and status responses.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Terminate => "QUIT",
            Self::CreateDirs => "MKDIRS",
            Self::DeleteDirs => "RMDIRS",
            Self::CreateFiles => "WRITE",
            Self::DeleteFiles => "RMFILES",
            Self::ReadFiles => "READ",
            Self::StatFiles => "STAT",
            Self::Sync => "SYNC",
            Self::DropCaches => "DROPCACHES",
        }
    }

    /// Label for the entries counter of this phase ("dirs" or "files").
    pub fn entry_type(self) -> &'static str {
        match self {
            Self::CreateDirs | Self::DeleteDirs => "dirs",
            _ => "files",
        }
    }

    /// Whether this phase transfers file contents (as opposed to pure
    /// metadata phases like stat or delete).
    pub fn is_rw_phase(self) -> bool {
        matches!(self, Self::CreateFiles | Self::ReadFiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 0..=9u8 {
            let phase = BenchPhase::from_code(code).unwrap();
            assert_eq!(phase.code(), code);
        }
        assert!(BenchPhase::from_code(10).is_none());
        assert!(BenchPhase::from_code(255).is_none());
    }

    #[test]
    fn test_phase_names_unique() {
        let names: Vec<_> = (0..=9u8)
            .map(|c| BenchPhase::from_code(c).unwrap().name())
            .collect();
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
    }

    #[test]
    fn test_entry_type() {
        assert_eq!(BenchPhase::CreateDirs.entry_type(), "dirs");
        assert_eq!(BenchPhase::DeleteDirs.entry_type(), "dirs");
        assert_eq!(BenchPhase::CreateFiles.entry_type(), "files");
        assert_eq!(BenchPhase::StatFiles.entry_type(), "files");
    }
}
