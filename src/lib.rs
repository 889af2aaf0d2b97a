/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr_core
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Distribution-agnostic package management core: backend
    detection, native package operations, AUR helper
    lifecycle and background workers for shells.

  Security / Safety Notes:
    Only mutating operations escalate privileges, and they
    are serialised through a single process-wide lock.

  Dependencies:
    tokio, serde, thiserror, regex, tempfile, which.

  Operational Scope:
    Linked by the `devmgr` CLI and by graphical shells.

  Revision History:
    2025-11-02 COD  Split core library from binary.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling
    - Single seam for every external process
============================================================*/

pub mod aur;
pub mod backend;
pub mod batch;
pub mod builder;
pub mod config;
pub mod control;
pub mod environment;
pub mod error;
pub mod logger;
pub mod packs;
pub mod runner;
pub mod search;
pub mod session;
pub mod summary;
pub mod worker;

pub use error::{DevmgrError, OperationResult, Result};
pub use session::{Session, SessionOptions};
