// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Inspection requests: small handles the engine hands to the driver so the
//! driver can stream an output entry's uncompressed bytes back in. The
//! engine keeps a clone of every handle it issues and extracts the buffered
//! bytes or the rolling digest once the driver reports the stream done.
//!
//! The driver may write from a worker thread, so each leaf guards its state
//! with a mutex sized for one writer plus one reader. A request is
//! single-shot: writes after `done` are a state violation, reads before
//! `done` are too.

use std::sync::{Arc, Mutex, MutexGuard};

use seal_common::*;

use crate::algorithms::{ContentHasher, DigestAlgorithm};

/// A request to inspect one output entry's uncompressed bytes.
#[derive(Clone)]
pub struct InspectRequest {
    entry_name: String,
    shape: Shape
}

#[derive(Clone)]
enum Shape {
    Leaf(Arc<Leaf>),
    // Tees every write to several child requests
    FanOut(Arc<Vec<InspectRequest>>)
}

struct Leaf {
    state: Mutex<LeafState>
}

enum LeafState {
    Buffering(Vec<u8>),
    Digesting(ContentHasher),
    DoneBuffer(Vec<u8>),
    DoneDigest(Vec<u8>)
}

impl InspectRequest {
    /// A request that buffers everything written to it.
    pub(crate) fn buffer(entry_name: &str) -> InspectRequest {
        InspectRequest {
            entry_name: entry_name.to_string(),
            shape: Shape::Leaf(Arc::new(Leaf {
                state: Mutex::new(LeafState::Buffering(Vec::new()))
            }))
        }
    }

    /// A request that folds everything written to it into a rolling hash.
    pub(crate) fn digest(entry_name: &str, algorithm: DigestAlgorithm) -> InspectRequest {
        InspectRequest {
            entry_name: entry_name.to_string(),
            shape: Shape::Leaf(Arc::new(Leaf {
                state: Mutex::new(LeafState::Digesting(algorithm.hasher()))
            }))
        }
    }

    /// A request that feeds every write to all of `requests`.
    pub(crate) fn fan_out(entry_name: &str, requests: Vec<InspectRequest>) -> InspectRequest {
        InspectRequest {
            entry_name: entry_name.to_string(),
            shape: Shape::FanOut(Arc::new(requests))
        }
    }

    /// Name of the APK entry this request wants to see.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Streams a chunk of the entry's uncompressed data into the request.
    pub fn consume(&self, chunk: &[u8]) -> Result<()> {
        match &self.shape {
            Shape::Leaf(leaf) => match &mut *leaf.lock() {
                LeafState::Buffering(buffer) => {
                    buffer.extend_from_slice(chunk);
                    Ok(())
                }
                LeafState::Digesting(hasher) => {
                    hasher.update(chunk);
                    Ok(())
                }
                LeafState::DoneBuffer(_) | LeafState::DoneDigest(_) => Err(SealError::State(
                    format!("inspection of {} is already done", self.entry_name)
                ))
            },
            Shape::FanOut(children) => {
                for child in children.iter() {
                    child.consume(chunk)?;
                }
                Ok(())
            }
        }
    }

    /// Marks the stream complete. Idempotent; digests are finalised here and
    /// their hashers released.
    pub fn done(&self) {
        match &self.shape {
            Shape::Leaf(leaf) => {
                let mut state = leaf.lock();
                // Placeholder lets us move the hasher out for finalisation
                let previous =
                    std::mem::replace(&mut *state, LeafState::DoneBuffer(Vec::new()));
                *state = match previous {
                    LeafState::Buffering(buffer) => LeafState::DoneBuffer(buffer),
                    LeafState::Digesting(hasher) => LeafState::DoneDigest(hasher.finalize()),
                    done => done
                };
            }
            Shape::FanOut(children) => {
                for child in children.iter() {
                    child.done();
                }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        match &self.shape {
            Shape::Leaf(leaf) => matches!(
                &*leaf.lock(),
                LeafState::DoneBuffer(_) | LeafState::DoneDigest(_)
            ),
            Shape::FanOut(children) => children.iter().all(InspectRequest::is_done)
        }
    }

    /// The buffered bytes of a done buffering request.
    pub(crate) fn data(&self) -> Result<Vec<u8>> {
        if let Shape::Leaf(leaf) = &self.shape {
            if let LeafState::DoneBuffer(buffer) = &*leaf.lock() {
                return Ok(buffer.clone());
            }
        }
        Err(SealError::State(format!(
            "no buffered data for {} yet",
            self.entry_name
        )))
    }

    /// The final digest of a done digesting request.
    pub(crate) fn digest_value(&self) -> Result<Vec<u8>> {
        if let Shape::Leaf(leaf) = &self.shape {
            if let LeafState::DoneDigest(digest) = &*leaf.lock() {
                return Ok(digest.clone());
            }
        }
        Err(SealError::State(format!(
            "no digest for {} yet",
            self.entry_name
        )))
    }
}

impl Leaf {
    // A panic while the lock is held is the only way to poison it; recovering
    // the inner state keeps `done` infallible.
    fn lock(&self) -> MutexGuard<'_, LeafState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
