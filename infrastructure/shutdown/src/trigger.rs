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

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
    },
    task::{Context, Poll},
};

use futures::{
    channel::oneshot,
    future::{FusedFuture, Shared},
    FutureExt,
};

/// A one-shot, many-receiver trigger. The first call to `fire` (or dropping the last clone) resolves every
/// `TriggerSignal` created from it.
#[derive(Clone, Debug)]
pub struct Trigger {
    inner: Arc<TriggerInner>,
    signal: TriggerSignal,
}

#[derive(Debug)]
struct TriggerInner {
    sender: Mutex<Option<oneshot::Sender<()>>>,
    fired: Arc<AtomicBool>,
}

impl Drop for TriggerInner {
    fn drop(&mut self) {
        self.fired.store(true, Ordering::SeqCst);
    }
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let fired = Arc::new(AtomicBool::new(false));
        Self {
            inner: Arc::new(TriggerInner {
                sender: Mutex::new(Some(tx)),
                fired: fired.clone(),
            }),
            signal: TriggerSignal {
                receiver: rx.shared(),
                fired,
                terminated: false,
            },
        }
    }

    pub fn fire(&mut self) {
        let mut lock = match self.inner.sender.lock() {
            Ok(lock) => lock,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = lock.take() {
            self.inner.fired.store(true, Ordering::SeqCst);
            let _result = tx.send(());
        }
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    pub fn to_signal(&self) -> TriggerSignal {
        let mut signal = self.signal.clone();
        signal.terminated = false;
        signal
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct TriggerSignal {
    receiver: Shared<oneshot::Receiver<()>>,
    fired: Arc<AtomicBool>,
    terminated: bool,
}

impl TriggerSignal {
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Future for TriggerSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.terminated {
            return Poll::Ready(());
        }
        // Fired and cancelled (sender dropped) both resolve the signal
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(_) => {
                self.terminated = true;
                Poll::Ready(())
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for TriggerSignal {
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
