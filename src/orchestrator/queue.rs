// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// FIFO of files waiting for their initial read.
///
/// A file leaves the queue only while fewer than `cap` files are in their
/// initial read; a file stops counting against the cap once it reports
/// completion.
#[derive(Debug)]
pub struct StartupQueue {
    pending: VecDeque<PathBuf>,
    in_initial_read: HashSet<PathBuf>,
    cap: usize,
    peak: usize,
}

impl StartupQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_initial_read: HashSet::new(),
            cap: cap.max(1),
            peak: 0,
        }
    }

    pub fn push(&mut self, path: PathBuf) {
        if !self.pending.contains(&path) && !self.in_initial_read.contains(&path) {
            self.pending.push_back(path);
        }
    }

    pub fn extend(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        for path in paths {
            self.push(path);
        }
    }

    /// Next file to start, if a slot is free
    pub fn next_ready(&mut self) -> Option<PathBuf> {
        if self.in_initial_read.len() >= self.cap {
            return None;
        }
        let path = self.pending.pop_front()?;
        self.in_initial_read.insert(path.clone());
        self.peak = self.peak.max(self.in_initial_read.len());
        Some(path)
    }

    /// Release the slot of a file. Returns false if the file held no slot.
    pub fn complete(&mut self, path: &Path) -> bool {
        self.in_initial_read.remove(path)
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    pub fn active(&self) -> usize {
        self.in_initial_read.len()
    }

    pub fn active_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.in_initial_read.iter()
    }

    /// Largest number of files that were in their initial read at once
    pub fn peak_active(&self) -> usize {
        self.peak
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_initial_read.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_initial_read.clear();
    }
}
