//! Safe reflection of a [`RawPluginDescriptor`](super::abi::RawPluginDescriptor)
//! and the default-value computation for control ports.

use std::ffi::CStr;

use super::abi::{RawDefaultHint, RawPluginDescriptor, RawPortFlags};

/// Direction/kind of one port. The two axes (audio/control, input/output)
/// are mutually exclusive, matching the raw bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    AudioInput,
    AudioOutput,
    ControlInput,
    ControlOutput,
}

impl PortKind {
    fn from_flags(flags: RawPortFlags) -> Self {
        match (flags.is_audio(), flags.is_input()) {
            (true, true) => PortKind::AudioInput,
            (true, false) => PortKind::AudioOutput,
            (false, true) => PortKind::ControlInput,
            (false, false) => PortKind::ControlOutput,
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, PortKind::AudioInput | PortKind::AudioOutput)
    }

    pub fn is_input(self) -> bool {
        matches!(self, PortKind::AudioInput | PortKind::ControlInput)
    }
}

/// The closed set of default-value hints a control input port may declare.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultHint {
    None,
    Zero,
    One,
    OneHundred,
    FourForty,
    Minimum,
    Low,
    Middle,
    High,
    Maximum,
}

impl From<RawDefaultHint> for DefaultHint {
    fn from(raw: RawDefaultHint) -> Self {
        match raw {
            RawDefaultHint::None => DefaultHint::None,
            RawDefaultHint::Zero => DefaultHint::Zero,
            RawDefaultHint::One => DefaultHint::One,
            RawDefaultHint::OneHundred => DefaultHint::OneHundred,
            RawDefaultHint::FourForty => DefaultHint::FourForty,
            RawDefaultHint::Minimum => DefaultHint::Minimum,
            RawDefaultHint::Low => DefaultHint::Low,
            RawDefaultHint::Middle => DefaultHint::Middle,
            RawDefaultHint::High => DefaultHint::High,
            RawDefaultHint::Maximum => DefaultHint::Maximum,
        }
    }
}

/// Range and default-value metadata, present only on control input ports
/// that declare one.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSpec {
    pub hint: DefaultHint,
    pub logarithmic: bool,
    pub lower_bound: f32,
    pub upper_bound: f32,
}

impl DefaultSpec {
    /// Computes the default control value from the closed hint set, per
    /// the piecewise formula: explicit constants return themselves,
    /// `min`/`max` return the bound, `low`/`middle`/`high` interpolate
    /// linearly or (if `logarithmic`) geometrically between the bounds,
    /// and `none` returns zero.
    pub fn compute(&self) -> f32 {
        let (lo, hi) = (self.lower_bound, self.upper_bound);
        let interpolate = |t: f32| -> f32 {
            if self.logarithmic && lo > 0.0 && hi > 0.0 {
                (lo.ln() * (1.0 - t) + hi.ln() * t).exp()
            } else {
                lo * (1.0 - t) + hi * t
            }
        };
        match self.hint {
            DefaultHint::None => 0.0,
            DefaultHint::Zero => 0.0,
            DefaultHint::One => 1.0,
            DefaultHint::OneHundred => 100.0,
            DefaultHint::FourForty => 440.0,
            DefaultHint::Minimum => lo,
            DefaultHint::Maximum => hi,
            DefaultHint::Low => interpolate(0.25),
            DefaultHint::Middle => interpolate(0.5),
            DefaultHint::High => interpolate(0.75),
        }
    }
}

/// One port of a [`PluginDescriptor`].
#[derive(Debug, Clone)]
pub struct PortDeclaration {
    pub index: usize,
    pub name: String,
    pub kind: PortKind,
    pub default: Option<DefaultSpec>,
}

/// Safe, owned reflection of a plugin type's immutable metadata.
pub struct PluginDescriptor {
    pub id: u64,
    pub name: String,
    pub ports: Vec<PortDeclaration>,
    pub(crate) raw: *const RawPluginDescriptor,
}

// SAFETY: the raw descriptor pointer is valid for the process lifetime once
// its owning library has been loaded (libraries are never unloaded), and
// the descriptor itself is immutable data exported by the plugin.
unsafe impl Send for PluginDescriptor {}
unsafe impl Sync for PluginDescriptor {}

impl PluginDescriptor {
    /// Reflects a raw descriptor into the safe, owned representation.
    ///
    /// # Safety
    ///
    /// `raw` must point to a valid `RawPluginDescriptor` whose `name`,
    /// `ports`, and each port's `name` pointers remain valid for as long as
    /// the owning library stays loaded.
    pub unsafe fn from_raw(raw: *const RawPluginDescriptor) -> Self {
        let d = &*raw;
        let name = CStr::from_ptr(d.name).to_string_lossy().into_owned();
        let mut ports = Vec::with_capacity(d.port_count as usize);
        for i in 0..d.port_count as usize {
            let p = &*d.ports.add(i);
            let port_name = CStr::from_ptr(p.name).to_string_lossy().into_owned();
            let kind = PortKind::from_flags(p.flags);
            let default = if kind == PortKind::ControlInput && p.range_hint.has_range != 0 {
                Some(DefaultSpec {
                    hint: p.range_hint.default_hint.into(),
                    logarithmic: p.range_hint.logarithmic != 0,
                    lower_bound: p.range_hint.lower_bound,
                    upper_bound: p.range_hint.upper_bound,
                })
            } else {
                None
            };
            ports.push(PortDeclaration {
                index: i,
                name: port_name,
                kind,
                default,
            });
        }
        PluginDescriptor {
            id: d.unique_id,
            name,
            ports,
            raw,
        }
    }

    pub fn port_by_name(&self, name: &str) -> Option<&PortDeclaration> {
        self.ports.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(hint: DefaultHint, lo: f32, hi: f32, log: bool) -> DefaultSpec {
        DefaultSpec {
            hint,
            logarithmic: log,
            lower_bound: lo,
            upper_bound: hi,
        }
    }

    #[test]
    fn explicit_constants_ignore_bounds() {
        assert_eq!(spec(DefaultHint::Zero, -9.0, 9.0, false).compute(), 0.0);
        assert_eq!(spec(DefaultHint::One, -9.0, 9.0, false).compute(), 1.0);
        assert_eq!(spec(DefaultHint::OneHundred, 0.0, 1.0, false).compute(), 100.0);
        assert_eq!(spec(DefaultHint::FourForty, 0.0, 1.0, false).compute(), 440.0);
        assert_eq!(spec(DefaultHint::None, 0.0, 1.0, false).compute(), 0.0);
    }

    #[test]
    fn bound_constants_return_bounds() {
        assert_eq!(spec(DefaultHint::Minimum, 2.0, 8.0, false).compute(), 2.0);
        assert_eq!(spec(DefaultHint::Maximum, 2.0, 8.0, false).compute(), 8.0);
    }

    #[test]
    fn linear_interpolation() {
        assert_eq!(spec(DefaultHint::Low, 0.0, 2.0, false).compute(), 0.5);
        assert_eq!(spec(DefaultHint::Middle, 0.0, 2.0, false).compute(), 1.0);
        assert_eq!(spec(DefaultHint::High, 0.0, 2.0, false).compute(), 1.5);
    }

    #[test]
    fn logarithmic_interpolation() {
        let middle = spec(DefaultHint::Middle, 20.0, 20000.0, true).compute();
        assert!((middle - (20.0f32 * 20000.0f32).sqrt()).abs() < 0.01);
    }
}
