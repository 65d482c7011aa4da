//! Text file formats read and written by the validation stages

pub mod insitu;
pub mod results;
pub mod text_array;

pub use insitu::{InSituRecord, InSituSeries};
pub use results::{ResultKey, TimeResult, PointSpaceResult};
pub use text_array::{ObservationFile, Variable, read_flat_array, read_flag_array, write_flat_array};
