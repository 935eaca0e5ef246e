// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Cooperative halt signaling between the event dispatcher and a running
//! session.
//!
//! The dispatcher holds the `Sender` and may broadcast the halt condition at
//! any time without blocking. The session holds the `Receiver` and observes
//! the condition either synchronously (`is_halted`, checked at sample
//! boundaries and before hardware writes) or by awaiting `wait_for_halt`
//! (select-ed against the inter-sample sleep).

use tokio::sync::watch;

/// Sender of the halt condition
#[derive(Clone)]
pub struct Sender {
    inner: watch::Sender<bool>,
}

impl Sender {
    /// Broadcast the halt condition. Idempotent.
    pub fn halt(&self) {
        // An error here means every receiver is gone, i.e. the session
        // already terminated; nothing left to stop.
        let _ = self.inner.send(true);
    }
}

/// Receiver of the halt condition
#[derive(Clone)]
pub struct Receiver {
    inner: watch::Receiver<bool>,
}

impl Receiver {
    /// Non-blocking check used at sample boundaries.
    pub fn is_halted(&self) -> bool {
        *self.inner.borrow()
    }

    /// Wait until halt is broadcast (returns immediately if it already was).
    pub async fn wait_for_halt(&mut self) {
        loop {
            if *self.inner.borrow() {
                return;
            }
            if self.inner.changed().await.is_err() {
                // Sender dropped without halting; treat as halt so orphaned
                // tasks wind down instead of running forever.
                return;
            }
        }
    }
}

pub fn make_pair() -> (Sender, Receiver) {
    let (tx, rx) = watch::channel(false);
    (Sender { inner: tx }, Receiver { inner: rx })
}
