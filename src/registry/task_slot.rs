// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tokio::task::AbortHandle;

/// Holds at most one background task for a device.
///
/// Installing a task aborts the one it replaces, and dropping the slot aborts
/// whatever it holds, so a slot never leaves a stale task running.
#[derive(Debug, Default)]
pub struct TaskSlot(Option<AbortHandle>);

impl TaskSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self(None)
    }

    /// Installs a task, aborting the previous one.
    pub fn replace(&mut self, handle: AbortHandle) {
        if let Some(old) = self.0.replace(handle) {
            old.abort();
        }
    }

    /// Aborts the current task, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }

}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
