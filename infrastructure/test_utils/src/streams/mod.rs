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

/// Collect `take` items from a stream, panicking if they do not arrive before `timeout`.
///
/// ```edition2021
/// # use futures::stream;
/// # use std::time::Duration;
/// # use nsm_test_utils::collect_stream;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stream = stream::iter(1..10);
/// assert_eq!(collect_stream!(stream, take = 3, timeout = Duration::from_secs(1)), vec![1, 2, 3]);
/// # }
/// ```
#[macro_export]
macro_rules! collect_stream {
    ($stream:expr, take = $take:expr, timeout = $timeout:expr $(,)?) => {{
        use futures::StreamExt;

        tokio::time::timeout($timeout, $stream.take($take).collect::<Vec<_>>())
            .await
            .unwrap_or_else(|_| panic!("Timeout before stream could collect {} item(s)", $take))
    }};
}

/// Receive `take` items from a tokio `mpsc` receiver, panicking if they do not arrive before `timeout`.
///
/// ```edition2021
/// # use std::time::Duration;
/// # use nsm_test_utils::collect_try_recv;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// tx.send("initial").unwrap();
/// tx.send("update").unwrap();
/// let items = collect_try_recv!(rx, take = 2, timeout = Duration::from_secs(1));
/// assert_eq!(items, vec!["initial", "update"]);
/// # }
/// ```
#[macro_export]
macro_rules! collect_try_recv {
    ($receiver:expr, take = $take:expr, timeout = $timeout:expr $(,)?) => {{
        let mut items = Vec::with_capacity($take);
        let deadline = tokio::time::Instant::now() + $timeout;
        while items.len() < $take {
            match tokio::time::timeout_at(deadline, $receiver.recv()).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => panic!("Channel closed after {} of {} item(s)", items.len(), $take),
                Err(_) => panic!("Timeout after receiving {} of {} item(s)", items.len(), $take),
            }
        }
        items
    }};
}
