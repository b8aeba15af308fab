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

/// Destructure the fields of an enum variant, panicking if the value is a different variant.
///
/// ```edition2021
/// # use nsm_test_utils::unpack_enum;
///
/// #[derive(Debug)]
/// enum HealOutcome {
///     Healed(String),
///     Closed { id: String, reason: &'static str },
///     Skipped,
/// }
///
/// let outcome = HealOutcome::Healed("1".to_string());
/// unpack_enum!(HealOutcome::Healed(id) = outcome);
/// assert_eq!(id, "1");
///
/// let outcome = HealOutcome::Closed { id: "2".to_string(), reason: "no endpoint" };
/// unpack_enum!(HealOutcome::Closed { id, reason } = outcome);
/// assert_eq!(id, "2");
/// assert_eq!(reason, "no endpoint");
///
/// unpack_enum!(HealOutcome::Skipped = HealOutcome::Skipped);
/// ```
#[macro_export]
macro_rules! unpack_enum {
    ($($variant:ident)::+ { $($fields:tt),* } = $value:expr) => {
        let ($($fields),+) = match $value {
            $($variant)::+ { $($fields),+ } => ($($fields),+),
            v => panic!("unpack_enum: expected {} but got {:?}", stringify!($($variant)::+), v),
        };
    };
    ($($variant:ident)::+ ( $($fields:tt),* ) = $value:expr) => {
        let ($($fields),+) = match $value {
            $($variant)::+ ($($fields),+) => ($($fields),+),
            v => panic!("unpack_enum: expected {} but got {:?}", stringify!($($variant)::+), v),
        };
    };
    ($($variant:ident)::+ = $value:expr) => {
        match $value {
            $($variant)::+ => {},
            v => panic!("unpack_enum: expected {} but got {:?}", stringify!($($variant)::+), v),
        };
    };
}
