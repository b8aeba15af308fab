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

//! # Heal
//!
//! Recovers Ready connections whose destination, forwarder or remote manager went away. Monitors hand a broken
//! connection to the [HealProcessor] through a [HealRequester] together with a [HealTrigger] naming what broke.
//!
//! The processor moves the connection from Ready to Healing and runs the [HealStateMachine] for the trigger on a
//! separate task, so a slow heal never blocks heals of other connections. A heal either brings the connection back to
//! Ready by re-running the request pipeline, or closes it.
//!
//! When healing is disabled in the [NsmConfig](crate::config::NsmConfig), broken connections are closed straight away.

mod error;
mod processor;
mod requester;
mod state_machine;

#[cfg(test)]
mod test;

pub use self::{
    error::HealError,
    processor::{HealProcessor, HealProcessorActor},
    requester::{HealOutcome, HealRequest, HealRequester, HealTrigger},
    state_machine::HealStateMachine,
};
