/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use tokio::sync::broadcast;

use crate::command::CommandData;
use crate::command_queue::QueueCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Stopped,
    Running,
    Stopping,
}

/// Broadcast to observers; lagging receivers lose the oldest events.
#[derive(Debug, Clone, Serialize)]
pub enum ServiceEvent {
    BeforeExecuting(CommandData),
    /// The command with its result filled in.
    AfterExecuting(CommandData),
    StateChanged(ServiceState),
    QueueProgress(QueueCounts),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServiceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }

    /// No receivers is not an error.
    pub fn emit(&self, event: ServiceEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}
