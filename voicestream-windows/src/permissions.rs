//! Windows microphone privacy permission check.
//!
//! On Windows 10 1803+, microphone access is controlled by the privacy
//! settings at Settings > Privacy > Microphone. Desktop apps are generally
//! allowed unless the user has disabled the global toggle.
//!
//! There's no per-app consent dialog for unpackaged desktop apps, so this
//! check only reports the current answer.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voicestream_core::models::audio_models::AudioSourceKind;
use voicestream_core::models::error::DeviceError;
use voicestream_core::traits::permission::PermissionProvider;

use crate::wasapi_source::{endpoint_role, ComScope};

/// [`PermissionProvider`] backed by a test activation of the default capture endpoint.
#[derive(Debug, Clone, Copy)]
pub struct WindowsMicPermission {
    kind: AudioSourceKind,
}

impl WindowsMicPermission {
    /// Activate the endpoint a recording of `kind` would use.
    pub fn for_source(kind: AudioSourceKind) -> Self {
        Self { kind }
    }
}

impl Default for WindowsMicPermission {
    fn default() -> Self {
        Self::for_source(AudioSourceKind::Mic)
    }
}

impl PermissionProvider for WindowsMicPermission {
    fn is_granted(&self) -> bool {
        match check_microphone_permission(self.kind) {
            Ok(granted) => granted,
            Err(e) => {
                log::warn!("Microphone permission check failed: {}", e);
                false
            }
        }
    }
}

/// Check if microphone access is available.
///
/// Activates an `IAudioClient` on the default capture endpoint. Access denied
/// or device-in-use means microphone access is disabled in Windows Privacy
/// Settings; no capture endpoint at all also reads as not granted.
pub fn check_microphone_permission(kind: AudioSourceKind) -> Result<bool, DeviceError> {
    let _com = ComScope::enter()?;

    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| DeviceError::Failure(format!("failed to create enumerator: {}", e)))?;

        let device = match enumerator.GetDefaultAudioEndpoint(eCapture, endpoint_role(kind)) {
            Ok(d) => d,
            Err(_) => return Ok(false),
        };

        let result: windows::core::Result<IAudioClient> = device.Activate(CLSCTX_ALL, None);
        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let code = e.code();
                if code == E_ACCESSDENIED || code == AUDCLNT_E_DEVICE_IN_USE {
                    Ok(false)
                } else {
                    log::warn!("Unexpected error checking mic permission: {}", e);
                    Ok(true)
                }
            }
        }
    }
}
