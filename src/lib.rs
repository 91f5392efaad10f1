// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A metered reverse proxy in front of paid AI-inference APIs: a client
//! pays once (pre-funded balance or a one-shot ecash token) and is then
//! billed per request, at cost, as it is forwarded to one of several
//! upstream providers.
//!
//! Module map mirrors spec.md's components: [`exchange`] (C1),
//! [`catalog`] (C2), [`multiplexer`] (C3), [`cost`] (C4), [`ledger`] (C5),
//! [`payment`] (C6), [`upstream`] (C7), [`gateway`] (C8).

pub mod api;
pub mod catalog;
pub mod cost;
pub mod exchange;
pub mod gateway;
pub mod io;
pub mod ledger;
pub mod multiplexer;
pub mod payment;
pub mod service;
pub mod state;
pub mod upstream;
pub mod util;
