use num::{FromPrimitive, traits::WrappingAdd};
use std::{env, time::Duration};

/// Increments a mutable reference in place, and returns the original value
pub(crate) fn wrapping_inplace_add<T: WrappingAdd + FromPrimitive + Copy>(value: &mut T) -> T {
    let id = *value;
    if let Some(one) = T::from_u8(1) {
        *value = value.wrapping_add(&one);
    }
    id
}

/// Get the connection timeout, either from environment or default 30 seconds
pub fn get_default_connection_timeout() -> Duration {
    let seconds = env::var("EPICS_CA_CONN_TMO")
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(30.0f32)
        .max(0.1f32);
    Duration::from_secs_f32(seconds)
}
