pub mod command;
pub mod decoder;
pub mod parser;

pub use command::{
    AckRecord, CalibrationRecord, Command, CommandId, GazePoint, Mode, Record, TelemetryRecord,
};
pub use decoder::{Frame, LineDecoder, MAX_LINE, MalformedFrame};
pub use parser::{ParseError, format_command, parse_command, parse_record};
