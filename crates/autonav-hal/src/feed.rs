//! Newline-delimited JSON sample feeds.
//!
//! Place recognition and IMU fusion run in separate processes on the robot;
//! they hand their output to the control core as one JSON document per line
//! over a pipe or FIFO.  [`JsonLinesSource`] decodes such a stream into
//! samples for a [`SensorPump`][crate::slot::SensorPump].
//!
//! # Example
//!
//! ```rust
//! use autonav_hal::SampleSource;
//! use autonav_hal::feed::JsonLinesSource;
//! use autonav_types::Orientation;
//!
//! let stream = b"{\"yaw_rad\": 0.5, \"gyro_z\": 0.0, \"accel_x\": 0.1}\n".as_slice();
//! let mut imu: JsonLinesSource<Orientation, _> = JsonLinesSource::new("imu", stream);
//! assert_eq!(imu.poll().unwrap().unwrap().yaw_rad, 0.5);
//! assert!(imu.poll().unwrap().is_none());
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::marker::PhantomData;

use autonav_types::NavError;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::driver::SampleSource;

pub struct JsonLinesSource<T, R> {
    id: String,
    reader: BufReader<R>,
    line: String,
    _sample: PhantomData<fn() -> T>,
}

impl<T, R: Read> JsonLinesSource<T, R> {
    pub fn new(id: impl Into<String>, reader: R) -> Self {
        Self {
            id: id.into(),
            reader: BufReader::new(reader),
            line: String::new(),
            _sample: PhantomData,
        }
    }
}

impl<T, R> SampleSource<T> for JsonLinesSource<T, R>
where
    T: DeserializeOwned + 'static,
    R: Read + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    /// Decode one line.  End of stream and blank lines yield `Ok(None)`; a
    /// line that does not parse is reported but does not end the feed.
    fn poll(&mut self) -> Result<Option<T>, NavError> {
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let text = self.line.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                serde_json::from_str(text).map(Some).map_err(|e| {
                    debug!(sensor = %self.id, error = %e, "undecodable feed line");
                    NavError::SensorUnavailable {
                        sensor: self.id.clone(),
                        details: format!("bad sample: {e}"),
                    }
                })
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(NavError::SensorUnavailable {
                sensor: self.id.clone(),
                details: e.to_string(),
            }),
        }
    }
}
