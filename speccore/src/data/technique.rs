use std::fmt;
use std::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::error::SpectrumError;

/// The analytical method a spectrum was acquired with.
///
/// # Description
///
/// The technique selects which databases are scanned and which axis conventions
/// a query must be reconciled with. Numeric codes follow the SDK constants
/// (`SEARCHSDK_TECHNIQUE_*`).
///
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Technique {
    Ftir,
    AtrIr,
    Raman,
    VaporPhaseIr,
    Ms,
}

impl Technique {
    pub const ALL: [Technique; 5] = [
        Technique::Ftir,
        Technique::AtrIr,
        Technique::Raman,
        Technique::VaporPhaseIr,
        Technique::Ms,
    ];

    /// Returns the `Technique` for the given SDK code.
    ///
    /// # Arguments
    ///
    /// * `code` - One of the `SEARCHSDK_TECHNIQUE_*` values (1 to 5).
    ///
    pub fn from_code(code: u32) -> Result<Technique, SpectrumError> {
        match code {
            1 => Ok(Technique::Ftir),
            2 => Ok(Technique::AtrIr),
            3 => Ok(Technique::Raman),
            4 => Ok(Technique::VaporPhaseIr),
            5 => Ok(Technique::Ms),
            _ => Err(SpectrumError::UnknownCode { kind: "technique", code }),
        }
    }

    /// Returns the SDK code of the technique.
    pub fn code(&self) -> u32 {
        match self {
            Technique::Ftir => 1,
            Technique::AtrIr => 2,
            Technique::Raman => 3,
            Technique::VaporPhaseIr => 4,
            Technique::Ms => 5,
        }
    }

    /// FTIR, ATR-IR and vapor-phase IR share absorbance conventions.
    pub fn is_infrared(&self) -> bool {
        matches!(self, Technique::Ftir | Technique::AtrIr | Technique::VaporPhaseIr)
    }

    pub fn native_x_unit(&self) -> XUnit {
        match self {
            Technique::Ms => XUnit::MassToCharge,
            _ => XUnit::Wavenumbers,
        }
    }

    pub fn native_y_unit(&self) -> YUnit {
        if self.is_infrared() {
            YUnit::Absorbance
        } else {
            YUnit::ArbitraryIntensity
        }
    }

    /// Stick spectra (MS) carry no baseline to remove.
    pub fn uses_baseline_correction(&self) -> bool {
        !matches!(self, Technique::Ms)
    }
}

impl Display for Technique {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Technique::Ftir => write!(f, "FTIR"),
            Technique::AtrIr => write!(f, "ATR-IR"),
            Technique::Raman => write!(f, "Raman"),
            Technique::VaporPhaseIr => write!(f, "Vapor-phase IR"),
            Technique::Ms => write!(f, "MS"),
        }
    }
}

impl TryFrom<u32> for Technique {
    type Error = SpectrumError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Technique::from_code(code)
    }
}

/// Unit of the spectral abscissa (`SEARCHSDK_XUNIT_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum XUnit {
    Wavenumbers,
    Nanometers,
    MassToCharge,
}

impl XUnit {
    pub fn from_code(code: u16) -> Result<XUnit, SpectrumError> {
        match code {
            1 => Ok(XUnit::Wavenumbers),
            2 => Ok(XUnit::Nanometers),
            3 => Ok(XUnit::MassToCharge),
            _ => Err(SpectrumError::UnknownCode { kind: "x unit", code: code as u32 }),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            XUnit::Wavenumbers => 1,
            XUnit::Nanometers => 2,
            XUnit::MassToCharge => 3,
        }
    }
}

impl Display for XUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            XUnit::Wavenumbers => write!(f, "wavenumbers"),
            XUnit::Nanometers => write!(f, "nanometers"),
            XUnit::MassToCharge => write!(f, "m/z"),
        }
    }
}

/// Unit of the spectral ordinate (`SEARCHSDK_YUNIT_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum YUnit {
    ArbitraryIntensity,
    Absorbance,
    Transmittance,
}

impl YUnit {
    pub fn from_code(code: u16) -> Result<YUnit, SpectrumError> {
        match code {
            1 => Ok(YUnit::ArbitraryIntensity),
            2 => Ok(YUnit::Absorbance),
            3 => Ok(YUnit::Transmittance),
            _ => Err(SpectrumError::UnknownCode { kind: "y unit", code: code as u32 }),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            YUnit::ArbitraryIntensity => 1,
            YUnit::Absorbance => 2,
            YUnit::Transmittance => 3,
        }
    }
}

impl Display for YUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            YUnit::ArbitraryIntensity => write!(f, "arbitrary intensity"),
            YUnit::Absorbance => write!(f, "absorbance"),
            YUnit::Transmittance => write!(f, "transmittance"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technique_codes() {
        for technique in Technique::ALL {
            assert_eq!(Technique::from_code(technique.code()).unwrap(), technique);
        }
        assert!(Technique::from_code(0).is_err());
        assert!(Technique::try_from(6u32).is_err());
    }

    #[test]
    fn test_native_units() {
        assert_eq!(Technique::AtrIr.native_y_unit(), YUnit::Absorbance);
        assert_eq!(Technique::Raman.native_y_unit(), YUnit::ArbitraryIntensity);
        assert_eq!(Technique::Ms.native_x_unit(), XUnit::MassToCharge);
        assert!(!Technique::Ms.uses_baseline_correction());
    }

    #[test]
    fn test_unknown_unit_codes() {
        assert_eq!(XUnit::from_code(2).unwrap(), XUnit::Nanometers);
        assert_eq!(YUnit::from_code(3).unwrap(), YUnit::Transmittance);
        assert!(matches!(XUnit::from_code(9), Err(SpectrumError::UnknownCode { kind: "x unit", code: 9 })));
        assert!(YUnit::from_code(0).is_err());
    }
}
