//! Playback status exchanged between receiver and controller.
//!
//! Wire shape: a struct with a required `playing` flag; `duration`,
//! `position` and `volume` are present only while playing.

use serde::{Deserialize, Serialize};

use crate::value::Value;
use crate::{Error, Result};

/// Highest volume a receiver reports.
pub const MAX_VOLUME: u8 = 128;

/// Last known playback state of a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// The most recent decode failed.
    pub error: bool,
    pub playing: bool,
    /// Media duration in seconds. Meaningful only while playing.
    pub duration: u64,
    /// Playback position in seconds. Meaningful only while playing.
    pub position: f64,
    /// Volume, 0-128. Meaningful only while playing.
    pub volume: u8,
}

impl PlaybackStatus {
    /// Update from a wire payload.
    ///
    /// On failure `error` is set and no other field changes: a missing field
    /// never leaves a half-updated status behind. When `playing` is false the
    /// remaining fields keep their previous values.
    pub fn update_from(&mut self, payload: &Value) -> Result<()> {
        match decode_fields(payload) {
            Ok(Fields::Stopped) => {
                self.error = false;
                self.playing = false;
                Ok(())
            }
            Ok(Fields::Playing {
                duration,
                position,
                volume,
            }) => {
                *self = PlaybackStatus {
                    error: false,
                    playing: true,
                    duration,
                    position,
                    volume,
                };
                Ok(())
            }
            Err(e) => {
                self.error = true;
                Err(e)
            }
        }
    }

    /// Decode a payload into a fresh status.
    pub fn decode(payload: &Value) -> Result<Self> {
        let mut status = Self::default();
        status.update_from(payload)?;
        Ok(status)
    }

    /// Encode to the wire payload; the mirror of [`update_from`](Self::update_from).
    pub fn encode(&self) -> Value {
        let mut fields = vec![("playing", Value::Bool(self.playing))];
        if self.playing {
            fields.push(("duration", Value::U64(self.duration)));
            fields.push(("position", Value::F64(self.position)));
            fields.push(("volume", Value::U8(self.volume)));
        }
        Value::structure(fields)
    }
}

enum Fields {
    Stopped,
    Playing {
        duration: u64,
        position: f64,
        volume: u8,
    },
}

fn required<'a>(payload: &'a Value, name: &str) -> Result<&'a Value> {
    payload
        .field(name)
        .ok_or_else(|| Error::Protocol(format!("status field '{name}' missing")))
}

fn decode_fields(payload: &Value) -> Result<Fields> {
    if !matches!(payload, Value::Struct(_)) {
        return Err(Error::Protocol(format!(
            "status payload must be a struct, got {}",
            payload.kind()
        )));
    }
    if !required(payload, "playing")?.as_bool()? {
        return Ok(Fields::Stopped);
    }

    let duration = required(payload, "duration")?.as_u64()?;
    let position = required(payload, "position")?.as_f64()?;
    let volume = required(payload, "volume")?.as_u8()?;
    if volume > MAX_VOLUME {
        return Err(Error::Protocol(format!("volume {volume} above {MAX_VOLUME}")));
    }

    Ok(Fields::Playing {
        duration,
        position,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_payload() -> Value {
        Value::structure([
            ("playing", Value::Bool(true)),
            ("duration", Value::U64(100)),
            ("position", Value::F64(10.5)),
            ("volume", Value::U8(64)),
        ])
    }

    #[test]
    fn decodes_playing_status() {
        let status = PlaybackStatus::decode(&playing_payload()).unwrap();
        assert_eq!(
            status,
            PlaybackStatus {
                error: false,
                playing: true,
                duration: 100,
                position: 10.5,
                volume: 64,
            }
        );
    }

    #[test]
    fn stopped_status_keeps_previous_fields() {
        let mut status = PlaybackStatus::decode(&playing_payload()).unwrap();
        status
            .update_from(&Value::structure([("playing", Value::Bool(false))]))
            .unwrap();

        assert!(!status.error);
        assert!(!status.playing);
        assert_eq!(status.duration, 100);
        assert_eq!(status.position, 10.5);
        assert_eq!(status.volume, 64);
    }

    #[test]
    fn missing_playing_flag_is_an_error() {
        let mut status = PlaybackStatus::decode(&playing_payload()).unwrap();
        let err = status
            .update_from(&Value::structure([("duration", Value::U64(5))]))
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
        assert!(status.error);
        assert!(status.playing);
        assert_eq!(status.duration, 100);
    }

    #[test]
    fn missing_field_while_playing_leaves_prior_values() {
        let mut status = PlaybackStatus::decode(&playing_payload()).unwrap();
        let partial = Value::structure([
            ("playing", Value::Bool(true)),
            ("duration", Value::U64(300)),
            ("position", Value::F64(1.0)),
        ]);

        assert!(status.update_from(&partial).is_err());
        assert!(status.error);
        assert_eq!(status.duration, 100);
        assert_eq!(status.position, 10.5);
        assert_eq!(status.volume, 64);
    }

    #[test]
    fn non_struct_payload_is_rejected() {
        assert!(PlaybackStatus::decode(&Value::U8(1)).is_err());
    }

    #[test]
    fn encode_mirrors_decode() {
        let status = PlaybackStatus::decode(&playing_payload()).unwrap();
        assert_eq!(status.encode(), playing_payload());

        let stopped = PlaybackStatus::default();
        assert_eq!(
            stopped.encode(),
            Value::structure([("playing", Value::Bool(false))])
        );
    }
}
