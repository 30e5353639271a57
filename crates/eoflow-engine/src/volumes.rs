// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ownership of task output volumes.
//!
//! Every task writes one output volume. The volume is read by exactly one
//! later task and deleted once that task is done. The [`VolumeArena`] holds
//! the volumes between producer and consumer, indexed by the producer's
//! sequence number, and checks the single-consumer rule both when the plan is
//! built and when volumes are taken out.

use std::collections::BTreeMap;

use eoflow_cluster::{ManagedResource, VolumeTemplate};
use thiserror::Error;

/// Violations of the volume hand-off rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum VolumeError {
    /// Two tasks share a sequence number.
    #[error("Duplicate task sequence number {0}")]
    DuplicateTask(u32),

    /// A task reads from a task that does not exist.
    #[error("Task {consumer} depends on unknown task {producer}")]
    UnknownProducer {
        /// Reading task.
        consumer: u32,
        /// Missing producer.
        producer: u32,
    },

    /// A task reads from a task that does not run before it.
    #[error("Task {consumer} depends on task {producer}, which does not run before it")]
    OutOfOrder {
        /// Reading task.
        consumer: u32,
        /// Producer scheduled at or after the consumer.
        producer: u32,
    },

    /// A volume would be read by two tasks.
    #[error("Output of task {producer} is read by both task {first} and task {second}")]
    SharedOutput {
        /// Producer.
        producer: u32,
        /// First consumer.
        first: u32,
        /// Second consumer.
        second: u32,
    },

    /// A task asked for a volume planned for another task.
    #[error("Task {consumer} may not take the output of task {producer}")]
    WrongConsumer {
        /// Requesting task.
        consumer: u32,
        /// Producer of the volume.
        producer: u32,
    },

    /// A volume is not in the arena.
    #[error("Output of task {0} is not available")]
    Missing(u32),

    /// A producer registered a second volume.
    #[error("Output of task {0} is already registered")]
    AlreadyRegistered(u32),
}

/// A task output volume together with where consumers mount it.
#[derive(Debug, Clone)]
pub struct HeldVolume {
    /// Producer sequence number.
    pub producer: u32,
    /// Mount path inside producer and consumer containers.
    pub mount_path: String,
    /// The volume claim.
    pub resource: ManagedResource<VolumeTemplate>,
}

impl HeldVolume {
    /// Volume of `producer`, mounted at `mount_path`.
    pub fn new(producer: u32, mount_path: impl Into<String>, template: VolumeTemplate) -> Self {
        Self {
            producer,
            mount_path: mount_path.into(),
            resource: ManagedResource::new(template),
        }
    }

    /// Claim name.
    pub fn name(&self) -> &str {
        self.resource.name()
    }
}

#[derive(Debug, Default)]
struct Slot {
    consumer: Option<u32>,
    volume: Option<HeldVolume>,
}

/// Volumes between their producer and their single consumer.
#[derive(Debug, Default)]
pub struct VolumeArena {
    slots: BTreeMap<u32, Slot>,
}

impl VolumeArena {
    /// Plan the hand-off for tasks given as `(seq_num, depends_on)`.
    pub fn plan<'a>(
        tasks: impl IntoIterator<Item = (u32, &'a [u32])>,
    ) -> Result<Self, VolumeError> {
        let tasks: Vec<(u32, &[u32])> = tasks.into_iter().collect();
        let mut slots: BTreeMap<u32, Slot> = BTreeMap::new();
        for (seq_num, _) in &tasks {
            if slots.insert(*seq_num, Slot::default()).is_some() {
                return Err(VolumeError::DuplicateTask(*seq_num));
            }
        }

        for (consumer, producers) in tasks {
            for &producer in producers {
                if producer >= consumer {
                    return Err(VolumeError::OutOfOrder { consumer, producer });
                }
                let slot = slots
                    .get_mut(&producer)
                    .ok_or(VolumeError::UnknownProducer { consumer, producer })?;
                if let Some(first) = slot.consumer {
                    return Err(VolumeError::SharedOutput {
                        producer,
                        first,
                        second: consumer,
                    });
                }
                slot.consumer = Some(consumer);
            }
        }

        Ok(Self { slots })
    }

    /// Planned consumer of a producer's output.
    pub fn consumer_of(&self, producer: u32) -> Option<u32> {
        self.slots.get(&producer).and_then(|slot| slot.consumer)
    }

    /// Store a producer's output until its consumer takes it.
    pub fn register(&mut self, volume: HeldVolume) -> Result<(), VolumeError> {
        let slot = self
            .slots
            .get_mut(&volume.producer)
            .ok_or(VolumeError::Missing(volume.producer))?;
        if slot.volume.is_some() {
            return Err(VolumeError::AlreadyRegistered(volume.producer));
        }
        slot.volume = Some(volume);
        Ok(())
    }

    /// Take the outputs of `producers` for `consumer`.
    ///
    /// Nothing is taken unless every volume is present and planned for
    /// `consumer`.
    pub fn take_inputs(
        &mut self,
        consumer: u32,
        producers: &[u32],
    ) -> Result<Vec<HeldVolume>, VolumeError> {
        for &producer in producers {
            let slot = self
                .slots
                .get(&producer)
                .ok_or(VolumeError::UnknownProducer { consumer, producer })?;
            if slot.consumer != Some(consumer) {
                return Err(VolumeError::WrongConsumer { consumer, producer });
            }
            if slot.volume.is_none() {
                return Err(VolumeError::Missing(producer));
            }
        }

        Ok(producers
            .iter()
            .filter_map(|producer| self.slots.get_mut(producer).and_then(|slot| slot.volume.take()))
            .collect())
    }

    /// Number of volumes currently held.
    pub fn held(&self) -> usize {
        self.slots.values().filter(|s| s.volume.is_some()).count()
    }

    /// Remove and return every held volume.
    pub fn drain(&mut self) -> Vec<HeldVolume> {
        self.slots
            .values_mut()
            .filter_map(|slot| slot.volume.take())
            .collect()
    }
}
