//! Support for the `sync` and `time` producer commands.
use std::num::NonZeroU8;
use std::time::Duration;

use can_socket::CanFrame;
use crate::dispatcher::{Dispatcher, PeriodicTask};
use crate::CanOpenSocket;

const SYNC_DEFAULT_COB_ID: u8 = 0x80;
const TIME_COB_ID: u16 = 0x100;

/// Number of days between the UNIX epoch and the CANopen TIME epoch (1984-01-01).
const CANOPEN_EPOCH_DAYS_SINCE_UNIX_EPOCH: u32 = 5114;

/// Send a SYNC command to the CAN network.
pub(crate) async fn send_sync(
	bus: &mut CanOpenSocket,
	counter: Option<NonZeroU8>,
) -> Result<(), std::io::Error> {
	log::debug!("Sending SYNC");
	let frame = match counter {
		Some(counter) => {
			log::debug!("└─ Counter: {counter}");
			CanFrame::new(SYNC_DEFAULT_COB_ID, [counter.get()])
		},
		None => {
			log::debug!("└─ Counter: no counter");
			CanFrame::new(SYNC_DEFAULT_COB_ID, [])
		}
	};

	bus.socket.send(&frame).await
}

/// A point in time as carried by the TIME protocol: milliseconds since midnight plus days since
/// the CANopen epoch (1984-01-01).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimeOfDay {
	/// Milliseconds elapsed since midnight, in the range `0..86_400_000`.
	pub milliseconds_since_midnight: u32,

	/// Days elapsed since 1984-01-01.
	pub days_since_1984: u16,
}

impl TimeOfDay {
	/// Derive a [`TimeOfDay`] from a duration since the UNIX epoch.
	pub fn from_duration_since_unix_epoch(duration: Duration) -> Self {
		let total_days = (duration.as_secs() / 86_400) as u32;
		let days_since_1984 = total_days.saturating_sub(CANOPEN_EPOCH_DAYS_SINCE_UNIX_EPOCH);
		let seconds_today = duration.as_secs() % 86_400;
		let milliseconds_since_midnight = seconds_today as u32 * 1000 + duration.subsec_millis();
		Self {
			milliseconds_since_midnight,
			days_since_1984: days_since_1984 as u16,
		}
	}

	fn to_payload(self) -> [u8; 6] {
		// Bits 0..27: milliseconds since midnight. Bits 28..31: reserved, set to 0.
		let ms = self.milliseconds_since_midnight.to_le_bytes();
		let days = self.days_since_1984.to_le_bytes();
		[ms[0], ms[1], ms[2], ms[3] & 0x0F, days[0], days[1]]
	}
}

/// Send a TIME message to the CAN network.
pub(crate) async fn send_time(bus: &mut CanOpenSocket, time: TimeOfDay) -> Result<(), std::io::Error> {
	log::debug!("Sending TIME: {time:?}");
	let frame = CanFrame::new(TIME_COB_ID, time.to_payload());
	bus.socket.send(&frame).await
}

/// Spawn a periodic SYNC producer that sends a SYNC frame every `period`, counting from 1 and
/// wrapping back to 1 after 240 (as CiA 301 reserves counter values above that).
pub fn spawn_sync_producer(dispatcher: &Dispatcher, period: Duration) -> PeriodicTask {
	let mut counter: u8 = 0;
	dispatcher.add_periodic(period, move || {
		counter = if counter >= 240 { 1 } else { counter + 1 };
		CanFrame::new(SYNC_DEFAULT_COB_ID, [counter])
	})
}

/// Spawn a periodic TIME producer that sends the current wall-clock time every `period`.
///
/// `now` is called once per tick so tests can supply a deterministic clock.
pub fn spawn_time_producer<F>(dispatcher: &Dispatcher, period: Duration, mut now: F) -> PeriodicTask
where
	F: FnMut() -> Duration + Send + 'static,
{
	dispatcher.add_periodic(period, move || {
		let time = TimeOfDay::from_duration_since_unix_epoch(now());
		CanFrame::new(TIME_COB_ID, time.to_payload())
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn time_of_day_encodes_midnight_at_epoch() {
		let time = TimeOfDay::from_duration_since_unix_epoch(Duration::from_secs(CANOPEN_EPOCH_DAYS_SINCE_UNIX_EPOCH as u64 * 86_400));
		assert_eq!(time.milliseconds_since_midnight, 0);
		assert_eq!(time.days_since_1984, 0);
	}

	#[test]
	fn time_of_day_payload_is_little_endian() {
		let time = TimeOfDay { milliseconds_since_midnight: 0x0102_0304 & 0x0FFF_FFFF, days_since_1984: 0x0506 };
		let payload = time.to_payload();
		assert_eq!(payload[4], 0x06);
		assert_eq!(payload[5], 0x05);
	}
}
