//  Copyright 2020, The Tari Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Shutdown signals
//!
//! A `Shutdown` is a trigger held by the owner of a unit of work. Any number of `ShutdownSignal`s can be created from
//! it and awaited by tasks. Shutdowns form a tree: a signal taken from a child resolves when the child or any of its
//! ancestors is triggered, which lets a component cancel one monitor task without touching the rest of the process.
//!
//! _Note_: a `Shutdown` also triggers when the last clone is dropped.

pub mod trigger;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::future::FusedFuture;

use crate::trigger::{Trigger, TriggerSignal};

#[derive(Clone, Debug)]
pub struct Shutdown {
    trigger: Trigger,
    ancestors: Vec<TriggerSignal>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            trigger: Trigger::new(),
            ancestors: Vec::new(),
        }
    }

    /// Create a child scope. Triggering the child does not affect this shutdown.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.trigger.to_signal());
        Self {
            trigger: Trigger::new(),
            ancestors,
        }
    }

    pub fn trigger(&mut self) {
        self.trigger.fire();
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_fired() || self.ancestors.iter().any(|s| s.is_fired())
    }

    pub fn to_signal(&self) -> ShutdownSignal {
        let mut signals = Vec::with_capacity(self.ancestors.len() + 1);
        signals.push(self.trigger.to_signal());
        signals.extend(self.ancestors.iter().cloned());
        ShutdownSignal {
            signals,
            terminated: false,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver end of a shutdown. Resolves once the owning `Shutdown` or any ancestor is triggered or dropped.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ShutdownSignal {
    signals: Vec<TriggerSignal>,
    terminated: bool,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.terminated || self.signals.iter().any(|s| s.is_fired())
    }

    /// Wait for the shutdown signal to trigger.
    pub fn wait(&mut self) -> &mut Self {
        self
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.terminated {
            return Poll::Ready(());
        }
        let ready = self
            .signals
            .iter_mut()
            .any(|signal| Pin::new(signal).poll(cx).is_ready());
        if ready {
            self.terminated = true;
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl FusedFuture for ShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::{task, time};

    use super::*;

    #[tokio::test]
    async fn trigger() {
        let mut shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        assert!(!shutdown.is_triggered());
        let fut = task::spawn(async move {
            signal.await;
        });
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        // Triggering twice is a no-op
        shutdown.trigger();
        assert!(shutdown.is_triggered());
        fut.await.unwrap();
    }

    #[tokio::test]
    async fn drop_resolves_signal() {
        let shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        drop(shutdown);
        time::timeout(Duration::from_secs(1), signal).await.unwrap();
    }

    #[tokio::test]
    async fn parent_trigger_resolves_child() {
        let mut parent = Shutdown::new();
        let child = parent.child();
        let child_signal = child.to_signal();
        assert!(!child.is_triggered());
        parent.trigger();
        assert!(child.is_triggered());
        time::timeout(Duration::from_secs(1), child_signal).await.unwrap();
    }

    #[tokio::test]
    async fn child_trigger_leaves_parent_running() {
        let parent = Shutdown::new();
        let mut child = parent.child();
        let parent_signal = parent.to_signal();
        child.trigger();
        time::timeout(Duration::from_secs(1), child.to_signal()).await.unwrap();
        assert!(!parent.is_triggered());
        assert!(time::timeout(Duration::from_millis(50), parent_signal).await.is_err());
    }
}
