use anyhow::Result;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::message::Arguments;
use crate::register_toolbelt;

pub struct Clock;

impl Default for Clock {
    fn default() -> Self {
        Self
    }
}

register_toolbelt! {
    Clock {
        description: "Wall-clock time on the engine host",
        tools: {
            "current_time" => current_time {
                description: "Returns the current time as seconds since the Unix epoch",
                params: []
            },
            "elapsed_since" => elapsed_since {
                description: "Returns how many seconds have passed since the given Unix timestamp",
                params: ["timestamp": "integer" => "Unix timestamp in seconds"]
            }
        }
    }
}

impl Clock {
    fn now() -> Result<i64> {
        Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
    }

    fn current_time(&self, _args: &Arguments) -> Result<String> {
        Ok(json!({ "unix_seconds": Self::now()? }).to_string())
    }

    fn elapsed_since(&self, args: &Arguments) -> Result<String> {
        let timestamp = args
            .get("timestamp")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("timestamp must be an integer"))?;

        Ok(json!({ "elapsed_seconds": Self::now()? - timestamp }).to_string())
    }
}
