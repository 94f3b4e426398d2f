//! Ember iPXE Script Generation
//!
//! Builds the iPXE scripts the boot dispatcher serves. The server decides
//! what a machine boots based on its lifecycle state; the machine only
//! executes what it is handed. Anything the server does not recognize or
//! is not ready to provision gets the exit script, which drops the
//! firmware back to local disk, not a hang and not an error.
//!
//! # Example
//!
//! ```
//! use ember_ipxe::{BootFlavor, ScriptParams, render_boot_script, exit_script};
//!
//! let params = ScriptParams {
//!     kernel_url: "http://10.0.0.2/images/1/file/vmlinuz?tok=abc".to_string(),
//!     initrd_url: "http://10.0.0.2/images/1/file/initrd.img?tok=abc".to_string(),
//!     cmdline: "console=ttyS0".to_string(),
//!     ..Default::default()
//! };
//! let script = render_boot_script(BootFlavor::Linux, &params).unwrap();
//! assert!(script.starts_with("#!ipxe"));
//!
//! assert_eq!(exit_script(), "#!ipxe\nexit\n");
//! ```

pub mod error;
pub mod script;

pub use error::*;
pub use script::*;
