//! Scores how closely an uploaded document photo matches reference images.
//!
//! Each candidate is compared with the query on two signals: a perceptual
//! hash of the image (after resizing the candidate to the query's
//! dimensions) and the edit distance between the OCR transcripts of both.
//! Candidates are fetched and scored concurrently; a candidate that cannot
//! be fetched or decoded gets a failure entry without affecting the others.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`core::image`] | decoding and size normalization |
//! | [`core::hash`] | perceptual fingerprints |
//! | [`core::text`] | edit-distance similarity |
//! | [`core::ocr`] | text extraction contract |
//! | [`core::fetch`] | candidate retrieval |
//! | [`core::compare`] | one query vs one candidate |
//! | [`core::batch`] | one query vs many candidates |
//! | [`config`] | TOML configuration |
//! | [`server`] | HTTP boundary |

pub mod config;
pub mod core;
pub mod server;
