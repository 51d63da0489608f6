//! Runtime PDO state: tracks trigger conditions and packs/unpacks payloads as frames arrive or events fire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use can_socket::{CanBaseId, CanFilter, CanFrame, CanId};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::dispatcher::Dispatcher;

use super::{pack_pdo, unpack_pdo, PdoConfigError, PdoMapping, PdoReceptionError, TpdoConfiguration, TpdoTransmissionType};

/// Runtime state of one TPDO: decides when the configured mapping should actually be sent.
///
/// Construct from a [`TpdoConfiguration`] and feed it either application-level field updates
/// (for event driven PDOs) or SYNC ticks (for synchronous PDOs); it hands back a frame to send
/// exactly when the transmission type and inhibit time allow it.
pub struct TpdoRuntime {
	cob_id: CanId,
	mapping: Vec<PdoMapping>,
	mode: TpdoTransmissionType,
	inhibit_time: Duration,
	sync_counter: u8,
	last_payload: Option<[u8; 8]>,
	last_sent_at: Option<Instant>,
	pending: Option<[u8; 8]>,
}

impl TpdoRuntime {
	/// Build a runtime from a TPDO's configuration.
	pub fn new(config: &TpdoConfiguration) -> Self {
		Self {
			cob_id: config.communication.cob_id,
			mapping: config.mapping.clone(),
			mode: config.communication.mode,
			inhibit_time: Duration::from_micros(u64::from(config.communication.inhibit_time_100us) * 100),
			sync_counter: 0,
			last_payload: None,
			last_sent_at: None,
			pending: None,
		}
	}

	/// Feed new raw field values (in mapping order) into the runtime.
	///
	/// For event driven transmission types, returns a frame to send immediately if the payload
	/// changed since the last *transmitted* payload and the inhibit time has elapsed. If the
	/// inhibit time has not yet elapsed the new payload is queued and sent by [`Self::on_sync`]
	/// or a subsequent call to this function once the inhibit time passes, rather than dropped.
	///
	/// For synchronous transmission types this only updates the latched payload; the actual
	/// send decision is made by [`Self::on_sync`].
	pub fn update(&mut self, fields: &[(PdoMapping, u64)]) -> Result<Option<CanFrame>, PdoConfigError> {
		let payload = pack_pdo(fields)?;

		if self.mode.is_sync().is_some() || self.mode.is_sync_acyclic() {
			self.pending = Some(payload);
			return Ok(None);
		}

		if Some(payload) == self.last_payload {
			return Ok(None);
		}

		if self.inhibited() {
			self.pending = Some(payload);
			return Ok(None);
		}

		Ok(Some(self.send(payload)))
	}

	/// Notify the runtime of a SYNC event (with its counter value, if a counter is in use).
	///
	/// Returns a frame to send if this SYNC should trigger a transmission: either because the
	/// configured sync interval elapsed, or because a pending event driven update was deferred
	/// by the inhibit time and can now go out.
	pub fn on_sync(&mut self) -> Option<CanFrame> {
		if let Some(interval) = self.mode.is_sync() {
			self.sync_counter = self.sync_counter.wrapping_add(1);
			if self.sync_counter < interval {
				return None;
			}
			self.sync_counter = 0;
			let payload = self.pending.or(self.last_payload)?;
			return Some(self.send(payload));
		}

		if !self.inhibited() {
			if let Some(payload) = self.pending.take() {
				return Some(self.send(payload));
			}
		}

		None
	}

	fn inhibited(&self) -> bool {
		match self.last_sent_at {
			Some(last) => Instant::now().duration_since(last) < self.inhibit_time,
			None => false,
		}
	}

	fn send(&mut self, payload: [u8; 8]) -> CanFrame {
		self.last_payload = Some(payload);
		self.last_sent_at = Some(Instant::now());
		self.pending = None;
		CanFrame::new(self.cob_id, payload)
	}
}

/// Runtime state of one RPDO: unpacks received frames into raw field values.
pub struct RpdoRuntime {
	cob_id: CanId,
	mapping: Vec<PdoMapping>,
	last_values: Option<Vec<u64>>,
}

impl RpdoRuntime {
	/// Build a runtime from an RPDO's mapping and communication parameters.
	pub fn new(cob_id: CanId, mapping: Vec<PdoMapping>) -> Self {
		Self {
			cob_id,
			mapping,
			last_values: None,
		}
	}

	/// Process a received CAN frame.
	///
	/// Returns the unpacked raw values (in mapping order) if the frame's ID matches this RPDO's
	/// configured COB-ID, `None` otherwise.
	pub fn on_frame(&mut self, frame: &CanFrame) -> Result<Option<&[u64]>, PdoConfigError> {
		if frame.is_rtr() || frame.id() != self.cob_id {
			return Ok(None);
		}
		let Some(data) = frame.data() else { return Ok(None) };
		let values = unpack_pdo(&self.mapping, data.as_slice())?;
		self.last_values = Some(values);
		Ok(self.last_values.as_deref())
	}

	/// Get the most recently unpacked values, if any frame has been received yet.
	pub fn last_values(&self) -> Option<&[u64]> {
		self.last_values.as_deref()
	}
}

type RpdoCallback = Arc<dyn Fn(&[u64], Instant) + Send + Sync>;

/// A single RPDO's live reception state: the latched [`RpdoRuntime`] plus the reception
/// timestamp, waiter and callback set spec.md's PDO map carries.
///
/// Shared via [`RpdoConsumer`], which feeds it from the dispatcher's receive thread; reads and
/// registrations are safe to call concurrently from any number of caller threads.
pub struct RpdoReception {
	runtime: Mutex<RpdoRuntime>,
	last_reception: Mutex<Option<Instant>>,
	notify: Notify,
	callbacks: Mutex<Vec<RpdoCallback>>,
}

impl RpdoReception {
	/// Build a reception tracker for an RPDO with the given COB-ID and mapping.
	pub fn new(cob_id: CanId, mapping: Vec<PdoMapping>) -> Self {
		Self {
			runtime: Mutex::new(RpdoRuntime::new(cob_id, mapping)),
			last_reception: Mutex::new(None),
			notify: Notify::new(),
			callbacks: Mutex::new(Vec::new()),
		}
	}

	/// Feed a received frame in. No-ops if it doesn't match this RPDO's COB-ID.
	///
	/// Invokes any registered callbacks synchronously, on the caller's thread (normally the
	/// dispatcher's receive pump), matching spec.md's "invoked on the receive thread" wording.
	fn on_frame(&self, frame: &CanFrame) -> Result<(), PdoConfigError> {
		let values = {
			let mut runtime = self.runtime.lock().unwrap();
			match runtime.on_frame(frame)? {
				Some(values) => values.to_vec(),
				None => return Ok(()),
			}
		};

		let now = Instant::now();
		*self.last_reception.lock().unwrap() = Some(now);
		self.notify.notify_waiters();

		for callback in self.callbacks.lock().unwrap().iter() {
			callback(&values, now);
		}
		Ok(())
	}

	/// Get the most recently unpacked values, if any frame has been received yet.
	pub fn last_values(&self) -> Option<Vec<u64>> {
		self.runtime.lock().unwrap().last_values().map(|values| values.to_vec())
	}

	/// Get the timestamp of the last matching frame, if any has been received yet.
	pub fn last_reception(&self) -> Option<Instant> {
		*self.last_reception.lock().unwrap()
	}

	/// Block until the next frame for this map arrives, up to `timeout`.
	///
	/// Returns the reception timestamp. If a frame arrived after this reception was registered
	/// but before this call, it is reported immediately.
	pub async fn wait_for_reception(&self, timeout: Duration) -> Result<Instant, PdoReceptionError> {
		let deadline = Instant::now() + timeout;
		let baseline = *self.last_reception.lock().unwrap();

		loop {
			if let Some(received_at) = *self.last_reception.lock().unwrap() {
				if baseline.map_or(true, |baseline| received_at > baseline) {
					return Ok(received_at);
				}
			}
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(PdoReceptionError::Timeout);
			}
			let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
		}
	}

	/// Register a callback to run every time a matching frame is unpacked.
	///
	/// Callbacks run synchronously on the receive thread; they must not block.
	pub fn add_callback<F>(&self, callback: F)
	where
		F: Fn(&[u64], Instant) + Send + Sync + 'static,
	{
		self.callbacks.lock().unwrap().push(Arc::new(callback));
	}
}

/// Tracks live RPDO reception for a set of (node, PDO number) pairs, fed from a [`Dispatcher`].
///
/// Registration is explicit: call [`Self::register`] with a node's RPDO mapping (as read or
/// configured via SDO) before frames for it start arriving. Unregistered frames are ignored.
#[derive(Default)]
pub struct RpdoConsumer {
	receptions: Mutex<HashMap<(u8, u16), Arc<RpdoReception>>>,
}

impl RpdoConsumer {
	/// Create an empty consumer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register (or replace) live reception tracking for `node_id`'s RPDO number `pdo`.
	pub fn register(&self, node_id: u8, pdo: u16, cob_id: CanId, mapping: Vec<PdoMapping>) -> Arc<RpdoReception> {
		let reception = Arc::new(RpdoReception::new(cob_id, mapping));
		self.receptions.lock().unwrap().insert((node_id, pdo), Arc::clone(&reception));
		reception
	}

	/// Stop tracking `node_id`'s RPDO number `pdo`.
	pub fn forget(&self, node_id: u8, pdo: u16) {
		self.receptions.lock().unwrap().remove(&(node_id, pdo));
	}

	/// Get the registered reception tracker for `node_id`'s RPDO number `pdo`, if any.
	pub fn get(&self, node_id: u8, pdo: u16) -> Option<Arc<RpdoReception>> {
		self.receptions.lock().unwrap().get(&(node_id, pdo)).cloned()
	}

	/// Feed one received CAN frame to every registered reception tracker.
	fn on_frame(&self, frame: &CanFrame) {
		let receptions: Vec<_> = self.receptions.lock().unwrap().values().cloned().collect();
		for reception in receptions {
			if let Err(error) = reception.on_frame(frame) {
				log::warn!("failed to unpack RPDO frame: {error}");
			}
		}
	}

	/// Run the consumer loop against a dispatcher until its subscription ends.
	///
	/// Subscribes to all frames; registered COB-IDs are arbitrary (SDO-configurable per node), so
	/// unlike the heartbeat/EMCY consumers there is no fixed function-code mask to filter on.
	pub async fn run(&self, dispatcher: &Dispatcher) {
		let filter = CanFilter::new(CanBaseId::new(0).unwrap().into());
		let mut subscription = dispatcher.subscribe(filter, 64);
		while let Some((frame, _timestamp)) = subscription.recv().await {
			self.on_frame(&frame);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pdo::{RpdoCommunicationParameters, RpdoTransmissionType};
	use crate::ObjectIndex;

	fn mapping(bits: u8) -> PdoMapping {
		PdoMapping { object: ObjectIndex::new(0x6041, 0), bit_length: bits }
	}

	fn config(mode: TpdoTransmissionType) -> TpdoConfiguration {
		TpdoConfiguration {
			communication: crate::pdo::TpdoCommunicationParameters {
				enabled: true,
				rtr_allowed: true,
				cob_id: CanId::new(0x180).unwrap(),
				mode,
				inhibit_time_100us: 0,
				event_timer_ms: 0,
				start_sync: 0,
			},
			mapping: vec![mapping(16)],
		}
	}

	#[test]
	fn event_driven_sends_only_on_change() {
		let mut runtime = TpdoRuntime::new(&config(TpdoTransmissionType::event_driven(false)));
		let first = runtime.update(&[(mapping(16), 1)]).unwrap();
		assert!(first.is_some());
		let second = runtime.update(&[(mapping(16), 1)]).unwrap();
		assert!(second.is_none(), "unchanged payload must not retransmit");
		let third = runtime.update(&[(mapping(16), 2)]).unwrap();
		assert!(third.is_some());
	}

	#[test]
	fn sync_driven_only_sends_on_interval() {
		let mut runtime = TpdoRuntime::new(&config(TpdoTransmissionType::sync(2).unwrap()));
		runtime.update(&[(mapping(16), 7)]).unwrap();
		assert!(runtime.on_sync().is_none(), "first sync tick does not reach the interval yet");
		assert!(runtime.on_sync().is_some(), "second sync tick reaches the interval");
	}

	#[test]
	fn rpdo_runtime_ignores_frames_for_other_cob_ids() {
		let mut runtime = RpdoRuntime::new(CanId::new(0x201).unwrap(), vec![mapping(16)]);
		let frame = CanFrame::new(0x202u16, [0x37, 0x02]);
		assert!(runtime.on_frame(&frame).unwrap().is_none());
	}

	#[test]
	fn rpdo_runtime_unpacks_matching_frames() {
		let mut runtime = RpdoRuntime::new(CanId::new(0x201).unwrap(), vec![mapping(16)]);
		let frame = CanFrame::new(0x201u16, [0x37, 0x02]);
		let values = runtime.on_frame(&frame).unwrap().unwrap();
		assert_eq!(values, &[0x0237]);
	}

	#[tokio::test]
	async fn wait_for_reception_returns_once_a_frame_arrives() {
		let reception = Arc::new(RpdoReception::new(CanId::new(0x201).unwrap(), vec![mapping(16)]));

		let waiter = tokio::spawn({
			let reception = Arc::clone(&reception);
			async move { reception.wait_for_reception(Duration::from_secs(1)).await }
		});

		tokio::time::sleep(Duration::from_millis(10)).await;
		reception.on_frame(&CanFrame::new(0x201u16, [0x37, 0x02])).unwrap();

		waiter.await.unwrap().unwrap();
		assert_eq!(reception.last_values(), Some(vec![0x0237]));
	}

	#[tokio::test]
	async fn wait_for_reception_times_out_without_a_frame() {
		let reception = RpdoReception::new(CanId::new(0x201).unwrap(), vec![mapping(16)]);
		let result = reception.wait_for_reception(Duration::from_millis(10)).await;
		assert!(matches!(result, Err(PdoReceptionError::Timeout)));
	}

	#[test]
	fn callback_runs_on_matching_reception() {
		let reception = RpdoReception::new(CanId::new(0x201).unwrap(), vec![mapping(16)]);
		let seen = Arc::new(Mutex::new(None));
		reception.add_callback({
			let seen = Arc::clone(&seen);
			move |values, _timestamp| *seen.lock().unwrap() = Some(values.to_vec())
		});

		reception.on_frame(&CanFrame::new(0x201u16, [0x37, 0x02])).unwrap();
		assert_eq!(*seen.lock().unwrap(), Some(vec![0x0237]));
	}

	#[test]
	fn consumer_dispatches_only_to_the_registered_pair() {
		let consumer = RpdoConsumer::new();
		consumer.register(5, 1, CanId::new(0x205).unwrap(), vec![mapping(16)]);
		consumer.register(6, 1, CanId::new(0x206).unwrap(), vec![mapping(16)]);

		consumer.on_frame(&CanFrame::new(0x205u16, [0x37, 0x02]));

		assert_eq!(consumer.get(5, 1).unwrap().last_values(), Some(vec![0x0237]));
		assert_eq!(consumer.get(6, 1).unwrap().last_values(), None);
		assert!(consumer.get(7, 1).is_none());
	}
}
