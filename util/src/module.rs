//! Cyclic module contract
//!
//! A module is initialised once from a parameter file, then called once per
//! control cycle. Each call returns the module's output and a status report,
//! both of which the module also archives.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::warn;

// Internal imports
use crate::{archive::Archived, session::Session};

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// The module's internal state.
pub trait State {
    /// Usually the parameter file name
    type InitData;
    type InitError;

    type InputData;
    type OutputData;
    type StatusReport;

    /// Degraded results are reported through `StatusReport`, this is only for
    /// cycles which produced no output at all.
    type ProcError;

    /// Load parameters and open the archives in `session`.
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError>;

    /// Process one control cycle.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;

    /// Process one control cycle then archive it.
    ///
    /// Losing an archive record doesn't stop the vehicle, so a failed write is
    /// logged and the output still returned.
    fn cycle(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    where
        Self: Archived,
    {
        let result = self.proc(input_data)?;

        if let Err(e) = self.write() {
            warn!("Could not write module archives: {}", e);
        }

        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::archive::ArchiveError;

    /// Doubles its input, archives into a vector unless told to fail.
    #[derive(Default)]
    struct Doubler {
        last: Option<f64>,
        archive: Vec<f64>,
        fail_writes: bool,
    }

    impl State for Doubler {
        type InitData = ();
        type InitError = ();
        type InputData = f64;
        type OutputData = f64;
        type StatusReport = usize;
        type ProcError = &'static str;

        fn init(&mut self, _: (), _: &Session) -> Result<(), ()> {
            Ok(())
        }

        fn proc(&mut self, input: &f64) -> Result<(f64, usize), &'static str> {
            if input.is_nan() {
                return Err("NaN input");
            }
            self.last = Some(2.0 * input);
            Ok((2.0 * input, self.archive.len()))
        }
    }

    impl Archived for Doubler {
        fn write(&mut self) -> Result<(), ArchiveError> {
            if self.fail_writes {
                return Err(ArchiveError::NotInitialised);
            }
            if let Some(v) = self.last {
                self.archive.push(v);
            }
            Ok(())
        }
    }

    #[test]
    fn test_cycle_archives() {
        let mut m = Doubler::default();

        assert_eq!(m.cycle(&1.5), Ok((3.0, 0)));
        assert_eq!(m.cycle(&-1.0), Ok((-2.0, 1)));
        assert_eq!(m.archive, vec![3.0, -2.0]);
    }

    #[test]
    fn test_cycle_survives_archive_failure() {
        let mut m = Doubler {
            fail_writes: true,
            ..Default::default()
        };

        assert_eq!(m.cycle(&2.0), Ok((4.0, 0)));
        assert!(m.archive.is_empty());
    }

    #[test]
    fn test_cycle_proc_error() {
        let mut m = Doubler::default();

        assert_eq!(m.cycle(&std::f64::NAN), Err("NaN input"));
        assert!(m.archive.is_empty());
    }
}
