// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Application services for the Paceline attendance service.
//!
//! This crate sits between the persistence layer and the HTTP gateway. It
//! owns session-code issuance, QR token signing, calendar materialisation,
//! the registration hot path, the CSV export, and the admin credential gate.
//!
//! Nothing in this crate serialises to JSON; the gateway is the only layer
//! that turns [`ApiError`] kinds and result types into wire shapes.

#![deny(
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    clippy::style,
    clippy::correctness,
    clippy::all
)]
#![allow(clippy::multiple_crate_versions)]

mod auth;
mod calendar;
mod codes;
mod error;
mod export;
mod qr;
mod registration;

#[cfg(test)]
mod tests;

pub use auth::AdminSecret;
pub use calendar::{CalendarManager, TodayStatus, month_bounds};
pub use codes::{
    CodeIssuer, DEFAULT_SESSION_CODE_ALPHABET, DEFAULT_SESSION_CODE_LEN, TokenError,
};
pub use error::ApiError;
pub use export::{EXPORT_HEADER, ExportService};
pub use qr::qr_svg_base64;
pub use registration::{Registered, RegistrationEngine};
