/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Host platform facts and the checks printed from them.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::{Error, Result};

const INDENT: usize = 4;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Feature {
    pub enabled: bool,
}

/// Boot Guard.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CbntFeature {
    pub enabled: bool,
    pub profile: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HardwareFeatures {
    pub txt: Feature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cbnt: Option<CbntFeature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suefi: Option<Feature>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os_name: String,
    pub os_version: String,
    pub bios_name: String,
    pub bios_version: String,
    pub processor_info: String,
    pub hardware_uuid: String,
    pub tpm_enabled: bool,
    pub tpm_version: String,
    pub txt_enabled: bool,
    pub tboot_installed: bool,
    pub hardware_features: HardwareFeatures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SgxSupport {
    NotSupported,
    Sgx1,
    Sgx2,
}

impl fmt::Display for SgxSupport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SgxSupport::NotSupported => "not_supported",
            SgxSupport::Sgx1 => "sgx_1_supported",
            SgxSupport::Sgx2 => "sgx_2_supported",
        })
    }
}

/// SGX instruction set support of the current CPU, from CPUID leaves 7
/// and 12h.
#[cfg(target_arch = "x86_64")]
pub fn detect_sgx() -> SgxSupport {
    use std::arch::x86_64::{__cpuid_count, __get_cpuid_max};

    #[allow(unused_unsafe)]
    unsafe {
        let max_leaf = __get_cpuid_max(0).0;
        if max_leaf < 0x12 || (__cpuid_count(0x7, 0).ebx >> 2) & 1 == 0 {
            return SgxSupport::NotSupported;
        }
        let eax = __cpuid_count(0x12, 0).eax;
        if eax & 0b10 != 0 {
            SgxSupport::Sgx2
        } else if eax & 0b1 != 0 {
            SgxSupport::Sgx1
        } else {
            SgxSupport::NotSupported
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn detect_sgx() -> SgxSupport {
    SgxSupport::NotSupported
}

/// Collects platform information (OS, BIOS, TPM, boot features).
pub trait PlatformInfoSource {
    fn platform_info(&self) -> std::result::Result<PlatformInfo, BoxError>;

    fn sgx_support(&self) -> SgxSupport {
        detect_sgx()
    }
}

impl<'a, T: PlatformInfoSource + ?Sized> PlatformInfoSource for &'a T {
    fn platform_info(&self) -> std::result::Result<PlatformInfo, BoxError> {
        (**self).platform_info()
    }

    fn sgx_support(&self) -> SgxSupport {
        (**self).sgx_support()
    }
}

fn indented<W: Write + ?Sized>(w: &mut W, msg: fmt::Arguments) -> Result<()> {
    writeln!(w, "{:indent$}{}", "", msg, indent = INDENT).map_err(Error::Output)
}

fn enabled(flag: bool) -> &'static str {
    if flag { "Enabled" } else { "Disabled" }
}

/// Prints the `HOST INFO` section and returns the collected info.
pub fn print_platform_info<W, P>(w: &mut W, source: &P) -> Result<PlatformInfo>
where
    W: Write + ?Sized,
    P: PlatformInfoSource + ?Sized,
{
    let info = match source.platform_info() {
        Ok(info) => info,
        Err(e) => {
            let err = Error::PlatformInfo(e);
            writeln!(w, "HOST INFO...FAILED").map_err(Error::Output)?;
            indented(w, format_args!("Error: {}", error_chain(&err)))?;
            return Err(err);
        }
    };
    writeln!(w, "HOST INFO...PASSED").map_err(Error::Output)?;

    indented(w, format_args!("OS: {} {}", info.os_name, info.os_version))?;
    indented(w, format_args!("BIOS: {} {}", info.bios_name, info.bios_version))?;
    indented(w, format_args!("CPU ID: {}", info.processor_info))?;
    indented(w, format_args!("System UUID: {}", info.hardware_uuid))?;

    let features = &info.hardware_features;
    indented(w, format_args!("TXT: {}", enabled(features.txt.enabled)))?;
    if let Some(cbnt) = &features.cbnt {
        indented(w, format_args!("BootGuard: {}", enabled(cbnt.enabled)))?;
        if cbnt.enabled {
            indented(w, format_args!("BootGuard Profile: {}", cbnt.profile))?;
        }
    }
    if let Some(suefi) = &features.suefi {
        indented(w, format_args!("SecureUEFI: {}", enabled(suefi.enabled)))?;
    }
    indented(w, format_args!("SGX: {}", source.sgx_support()))?;
    Ok(info)
}

/// Prints the `Trusted Boot` section. Trusted boot needs an enabled TPM
/// and either TXT with tboot or Secure UEFI, or Boot Guard with Secure
/// UEFI.
pub fn check_trusted_boot<W, P>(w: &mut W, source: &P) -> Result<bool>
where
    W: Write + ?Sized,
    P: PlatformInfoSource + ?Sized,
{
    let info = source.platform_info().map_err(Error::PlatformInfo)?;
    if !info.tpm_enabled {
        writeln!(w, "Trusted Boot...FAILED").map_err(Error::Output)?;
        indented(w, format_args!("TPM not enabled"))?;
        return Ok(false);
    }

    let txt = info.txt_enabled;
    let tboot = info.tboot_installed;
    let boot_guard = info.hardware_features.cbnt.as_ref().map_or(false, |f| f.enabled);
    let suefi = info.hardware_features.suefi.as_ref().map_or(false, |f| f.enabled);

    let passed = if txt { tboot || suefi } else { boot_guard && suefi };

    let options = [(txt, "TXT"), (boot_guard, "Boot Guard"), (tboot, "tboot"), (suefi, "SUEFI")]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ");

    if passed {
        writeln!(w, "Trusted Boot...PASSED").map_err(Error::Output)?;
        indented(w, format_args!("Trusted boot configuration: {}", options))?;
    } else {
        writeln!(w, "Trusted Boot...FAILED").map_err(Error::Output)?;
        indented(w, format_args!("Detected configuration is invalid: {}", options))?;
    }
    Ok(passed)
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
