// Fluid Backdrop - GPU stable-fluids background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::backend::{FieldBackend, FieldFormat, FilterMode};

/// Side length of the throwaway target used by completeness probes.
pub const PROBE_EXTENT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub format: FieldFormat,
    pub filter: FilterMode,
}

impl Capabilities {
    pub const FALLBACK: Capabilities = Capabilities {
        format: FieldFormat::Unorm8,
        filter: FilterMode::Nearest,
    };
}

/// Picks the best format the device can render into and sample from.
///
/// Float formats get linear filtering when the device can filter them;
/// the 8-bit fallback always samples nearest.
pub fn probe_capabilities<B: FieldBackend>(backend: &mut B) -> Capabilities {
    for format in [FieldFormat::Float32, FieldFormat::Float16] {
        if backend.supports_format(format) {
            let filter = if backend.supports_linear_filtering(format) {
                FilterMode::Linear
            } else {
                FilterMode::Nearest
            };
            log::debug!("Field format {format:?} is renderable, filtering {filter:?}");
            return Capabilities { format, filter };
        }
        log::debug!("Field format {format:?} failed the completeness probe");
    }
    Capabilities::FALLBACK
}
