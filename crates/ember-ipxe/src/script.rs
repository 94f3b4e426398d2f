//! iPXE script assembly
//!
//! One script shape per boot flavour. All artifact URLs arrive pre-signed;
//! this module does pure string assembly and never touches the network or
//! the store.

use crate::error::{Result, ScriptError};

/// Boot flavour of an image, deciding which script shape is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFlavor {
    /// Linux kernel + initrd (+ optional overlay initrds)
    Linux,
    /// Windows PE via wimboot
    Wimboot,
    /// VMware ESXi mboot
    Esxi,
    /// Legacy ISO via memdisk
    Iso,
    /// Operator-supplied script text
    Custom,
}

impl BootFlavor {
    /// Parse the stored flavour string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "linux" => Ok(BootFlavor::Linux),
            "wimboot" => Ok(BootFlavor::Wimboot),
            "esxi" => Ok(BootFlavor::Esxi),
            "iso" => Ok(BootFlavor::Iso),
            "custom" => Ok(BootFlavor::Custom),
            other => Err(ScriptError::UnknownFlavor(other.to_string())),
        }
    }

    /// The stored string form
    pub fn as_str(&self) -> &'static str {
        match self {
            BootFlavor::Linux => "linux",
            BootFlavor::Wimboot => "wimboot",
            BootFlavor::Esxi => "esxi",
            BootFlavor::Iso => "iso",
            BootFlavor::Custom => "custom",
        }
    }

    /// File names this flavour expects under `images/<id>/`
    pub fn required_files(&self) -> &'static [&'static str] {
        match self {
            BootFlavor::Linux => &["vmlinuz", "initrd.img"],
            BootFlavor::Wimboot => &["wimboot", "BCD", "boot.sdi", "boot.wim"],
            BootFlavor::Esxi => &["mboot.efi", "boot.cfg"],
            BootFlavor::Iso => &["memdisk", "boot.iso"],
            BootFlavor::Custom => &[],
        }
    }
}

/// Pre-signed URLs for flavour-specific extra files
#[derive(Debug, Clone, Default)]
pub struct ExtraFileUrls {
    /// wimboot: BCD store
    pub bcd: String,
    /// wimboot: boot.sdi
    pub boot_sdi: String,
    /// wimboot: boot.wim
    pub boot_wim: String,
    /// esxi: boot.cfg
    pub boot_cfg: String,
    /// iso: boot.iso
    pub boot_iso: String,
}

/// Everything a script render needs
#[derive(Debug, Clone, Default)]
pub struct ScriptParams {
    /// Signed URL of the kernel-position file (vmlinuz, wimboot, mboot.efi, memdisk)
    pub kernel_url: String,
    /// Signed URL of the primary initrd (linux only)
    pub initrd_url: String,
    /// Effective kernel command line
    pub cmdline: String,
    /// Signed URLs of overlay initrds stacked after the primary
    pub overlay_urls: Vec<String>,
    /// Flavour-specific extra file URLs
    pub extra: ExtraFileUrls,
    /// Pre-rendered operator script for the custom flavour
    pub custom_script: String,
}

/// The no-op script: boot falls through to local disk
pub fn exit_script() -> String {
    "#!ipxe\nexit\n".to_string()
}

/// Render the boot script for the given flavour
pub fn render_boot_script(flavor: BootFlavor, params: &ScriptParams) -> Result<String> {
    match flavor {
        BootFlavor::Linux => {
            let mut script = format!(
                "#!ipxe\nkernel {} {}\ninitrd {}\n",
                params.kernel_url, params.cmdline, params.initrd_url
            );
            for overlay in &params.overlay_urls {
                script.push_str(&format!("initrd {}\n", overlay));
            }
            script.push_str("boot\n");
            Ok(script)
        }
        BootFlavor::Wimboot => Ok(format!(
            "#!ipxe\nkernel {}\ninitrd --name BCD {}\ninitrd --name boot.sdi {}\ninitrd --name boot.wim {}\nboot\n",
            params.kernel_url, params.extra.bcd, params.extra.boot_sdi, params.extra.boot_wim
        )),
        BootFlavor::Esxi => Ok(format!(
            "#!ipxe\nkernel {} -c {} {}\nboot\n",
            params.kernel_url, params.extra.boot_cfg, params.cmdline
        )),
        BootFlavor::Iso => Ok(format!(
            "#!ipxe\nkernel {} iso raw\ninitrd {}\nboot\n",
            params.kernel_url, params.extra.boot_iso
        )),
        BootFlavor::Custom => {
            // Empty operator script: fall through to local boot
            if params.custom_script.is_empty() {
                Ok(exit_script())
            } else {
                Ok(params.custom_script.clone())
            }
        }
    }
}

/// Wrap a script in a 30 second confirmation menu that defaults to cancel.
/// The inner shebang is stripped and the outer one reattached so the
/// result stays a single valid script.
pub fn wrap_with_confirmation(script: &str, hostname: &str, mac: &str) -> String {
    let label = if hostname.is_empty() {
        mac.to_string()
    } else {
        format!("{} ({})", hostname, mac)
    };

    format!(
        "#!ipxe\n\
         \n\
         menu Confirm Reimage: {label}\n\
         item --gap\n\
         item --gap This system is flagged for reimage.\n\
         item --gap Proceeding will ERASE ALL DATA on this machine.\n\
         item --gap\n\
         item confirm Proceed with reimage\n\
         item cancel  Cancel and boot normally\n\
         choose --default cancel --timeout 30000 selected && goto ${{selected}} || goto cancel\n\
         \n\
         :cancel\n\
         echo Cancelled. Booting from local disk...\n\
         exit\n\
         \n\
         :confirm\n\
         {body}",
        label = label,
        body = strip_shebang(script)
    )
}

fn strip_shebang(script: &str) -> &str {
    if let Some(rest) = script.strip_prefix("#!ipxe\r\n") {
        rest
    } else if let Some(rest) = script.strip_prefix("#!ipxe\n") {
        rest
    } else {
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux_params() -> ScriptParams {
        ScriptParams {
            kernel_url: "http://s/images/3/file/vmlinuz?tok=t".to_string(),
            initrd_url: "http://s/images/3/file/initrd.img?tok=t".to_string(),
            cmdline: "console=ttyS0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_flavor_parse_roundtrip() {
        for s in ["linux", "wimboot", "esxi", "iso", "custom"] {
            assert_eq!(BootFlavor::parse(s).unwrap().as_str(), s);
        }
        assert!(BootFlavor::parse("floppy").is_err());
    }

    #[test]
    fn test_required_files() {
        assert_eq!(BootFlavor::Linux.required_files(), &["vmlinuz", "initrd.img"]);
        assert_eq!(
            BootFlavor::Wimboot.required_files(),
            &["wimboot", "BCD", "boot.sdi", "boot.wim"]
        );
        assert!(BootFlavor::Custom.required_files().is_empty());
    }

    #[test]
    fn test_exit_script() {
        assert_eq!(exit_script(), "#!ipxe\nexit\n");
    }

    #[test]
    fn test_linux_script() {
        let script = render_boot_script(BootFlavor::Linux, &linux_params()).unwrap();
        assert!(script.starts_with("#!ipxe\n"));
        assert!(script.contains("kernel http://s/images/3/file/vmlinuz?tok=t console=ttyS0\n"));
        assert!(script.contains("initrd http://s/images/3/file/initrd.img?tok=t\n"));
        assert!(script.ends_with("boot\n"));
    }

    #[test]
    fn test_linux_script_with_overlay() {
        let mut params = linux_params();
        params
            .overlay_urls
            .push("http://s/profiles/2/overlay/site.img?tok=t".to_string());

        let script = render_boot_script(BootFlavor::Linux, &params).unwrap();
        let initrd_lines: Vec<&str> = script
            .lines()
            .filter(|l| l.starts_with("initrd "))
            .collect();
        assert_eq!(initrd_lines.len(), 2);
        assert_eq!(initrd_lines[1], "initrd http://s/profiles/2/overlay/site.img?tok=t");
        // Overlay stacks after the primary initrd, before boot
        assert!(script.ends_with("boot\n"));
    }

    #[test]
    fn test_wimboot_script() {
        let params = ScriptParams {
            kernel_url: "http://s/images/5/file/wimboot?tok=t".to_string(),
            extra: ExtraFileUrls {
                bcd: "http://s/images/5/file/BCD?tok=t".to_string(),
                boot_sdi: "http://s/images/5/file/boot.sdi?tok=t".to_string(),
                boot_wim: "http://s/images/5/file/boot.wim?tok=t".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let script = render_boot_script(BootFlavor::Wimboot, &params).unwrap();
        assert!(script.contains("kernel http://s/images/5/file/wimboot?tok=t\n"));
        assert!(script.contains("initrd --name BCD http://s/images/5/file/BCD?tok=t\n"));
        assert!(script.contains("initrd --name boot.sdi http://s/images/5/file/boot.sdi?tok=t\n"));
        assert!(script.contains("initrd --name boot.wim http://s/images/5/file/boot.wim?tok=t\n"));
    }

    #[test]
    fn test_esxi_script() {
        let params = ScriptParams {
            kernel_url: "http://s/images/7/file/mboot.efi?tok=t".to_string(),
            cmdline: "runweasel".to_string(),
            extra: ExtraFileUrls {
                boot_cfg: "http://s/images/7/file/boot.cfg?tok=t".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let script = render_boot_script(BootFlavor::Esxi, &params).unwrap();
        assert!(script.contains(
            "kernel http://s/images/7/file/mboot.efi?tok=t -c http://s/images/7/file/boot.cfg?tok=t runweasel\n"
        ));
    }

    #[test]
    fn test_iso_script() {
        let params = ScriptParams {
            kernel_url: "http://s/images/9/file/memdisk?tok=t".to_string(),
            extra: ExtraFileUrls {
                boot_iso: "http://s/images/9/file/boot.iso?tok=t".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let script = render_boot_script(BootFlavor::Iso, &params).unwrap();
        assert!(script.contains("kernel http://s/images/9/file/memdisk?tok=t iso raw\n"));
        assert!(script.contains("initrd http://s/images/9/file/boot.iso?tok=t\n"));
    }

    #[test]
    fn test_custom_script_passthrough() {
        let params = ScriptParams {
            custom_script: "#!ipxe\nchain http://elsewhere/boot\n".to_string(),
            ..Default::default()
        };
        let script = render_boot_script(BootFlavor::Custom, &params).unwrap();
        assert_eq!(script, "#!ipxe\nchain http://elsewhere/boot\n");
    }

    #[test]
    fn test_custom_script_empty_falls_through() {
        let params = ScriptParams::default();
        let script = render_boot_script(BootFlavor::Custom, &params).unwrap();
        assert_eq!(script, exit_script());
    }

    #[test]
    fn test_confirmation_wrap() {
        let inner = render_boot_script(BootFlavor::Linux, &linux_params()).unwrap();
        let wrapped = wrap_with_confirmation(&inner, "node01", "aa:bb:cc:dd:ee:ff");

        // Exactly one shebang, at the top
        assert!(wrapped.starts_with("#!ipxe\n"));
        assert_eq!(wrapped.matches("#!ipxe").count(), 1);
        assert!(wrapped.contains("Confirm Reimage: node01 (aa:bb:cc:dd:ee:ff)"));
        assert!(wrapped.contains("choose --default cancel --timeout 30000"));
        // The inner script survives under the :confirm label
        assert!(wrapped.contains(":confirm\nkernel "));
    }

    #[test]
    fn test_confirmation_wrap_without_hostname() {
        let wrapped = wrap_with_confirmation("#!ipxe\nboot\n", "", "aa:bb:cc:dd:ee:ff");
        assert!(wrapped.contains("Confirm Reimage: aa:bb:cc:dd:ee:ff\n"));
    }
}
