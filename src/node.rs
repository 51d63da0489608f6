//! A handle to a single node on a [`Network`].

use std::time::Duration;

use tokio::time::Instant;

use crate::network::Network;
use crate::{dictionary, emcy, nmt, pdo, sdo, ObjectIndex};

/// A view of a single CANopen node, scoped to a [`Network`].
///
/// Cheap to create and drop; all state lives on the [`Network`] it borrows from.
#[derive(Copy, Clone)]
#[allow(missing_debug_implementations)]
pub struct Node<'net> {
	network: &'net Network,
	node_id: u8,
}

impl<'net> Node<'net> {
	pub(crate) fn new(network: &'net Network, node_id: u8) -> Self {
		Self { network, node_id }
	}

	/// The node ID this handle addresses.
	pub fn node_id(&self) -> u8 {
		self.node_id
	}

	/// Read an object dictionary value by performing an SDO upload into a caller-provided buffer.
	pub async fn sdo_upload_raw(&self, object: ObjectIndex, buffer: &mut [u8], timeout: Duration) -> Result<usize, sdo::SdoError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_upload_raw(self.node_id, sdo, object, buffer, timeout).await
	}

	/// Read a typed object dictionary value by performing an SDO upload.
	pub async fn sdo_upload<T: sdo::UploadObject>(&self, object: ObjectIndex, timeout: Duration) -> Result<T, sdo::UploadError<T::Error>> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_upload(self.node_id, sdo, object, timeout).await
	}

	/// Write an object dictionary value by performing an SDO download.
	pub async fn sdo_download<T: sdo::DownloadObject>(&self, object: ObjectIndex, data: T, timeout: Duration) -> Result<(), sdo::SdoError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_download(self.node_id, sdo, object, data, timeout).await
	}

	/// Write a large object dictionary value using an SDO block transfer.
	pub async fn sdo_block_download(&self, object: ObjectIndex, data: &[u8], timeout: Duration) -> Result<(), sdo::SdoError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_block_download(self.node_id, sdo, object, data, timeout).await
	}

	/// Read a large object dictionary value using an SDO block transfer.
	pub async fn sdo_block_upload(&self, object: ObjectIndex, blksize: u8, timeout: Duration) -> Result<Vec<u8>, sdo::SdoError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_block_upload(self.node_id, sdo, object, blksize, timeout).await
	}

	/// Read an object dictionary variable's value, checked against its declared data type.
	pub async fn sdo_read_variable(&self, variable: &dictionary::Variable, timeout: Duration) -> Result<dictionary::Value, sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_read_variable(self.node_id, sdo, variable, timeout).await
	}

	/// Write a value to an object dictionary variable.
	pub async fn sdo_write_variable(&self, variable: &dictionary::Variable, value: &dictionary::Value, timeout: Duration) -> Result<(), sdo::SdoError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_write_variable(self.node_id, sdo, variable, value, timeout).await
	}

	/// Read an object dictionary variable's scaled engineering value: `phys = raw * factor + offset`.
	pub async fn sdo_read_variable_phys(&self, variable: &dictionary::Variable, timeout: Duration) -> Result<f64, sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_read_variable_phys(self.node_id, sdo, variable, timeout).await
	}

	/// Write a scaled engineering value to an object dictionary variable: `raw = round((phys - offset) / factor)`.
	pub async fn sdo_write_variable_phys(&self, variable: &dictionary::Variable, phys: f64, timeout: Duration) -> Result<(), sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_write_variable_phys(self.node_id, sdo, variable, phys, timeout).await
	}

	/// Read an object dictionary variable's symbolic value, looked up from its current raw value.
	pub async fn sdo_read_variable_desc(&self, variable: &dictionary::Variable, timeout: Duration) -> Result<String, sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_read_variable_desc(self.node_id, sdo, variable, timeout).await
	}

	/// Write an object dictionary variable's value by its symbolic name.
	pub async fn sdo_write_variable_desc(&self, variable: &dictionary::Variable, desc: &str, timeout: Duration) -> Result<(), sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_write_variable_desc(self.node_id, sdo, variable, desc, timeout).await
	}

	/// Read a single named bit out of an object dictionary variable's current raw value.
	pub async fn sdo_read_variable_bit(&self, variable: &dictionary::Variable, name: &str, timeout: Duration) -> Result<bool, sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_read_variable_bit(self.node_id, sdo, variable, name, timeout).await
	}

	/// Set or clear a single named bit of an object dictionary variable, as a read-modify-write
	/// against its current raw value.
	pub async fn sdo_write_variable_bit(&self, variable: &dictionary::Variable, name: &str, set: bool, timeout: Duration) -> Result<(), sdo::ClientError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.sdo_write_variable_bit(self.node_id, sdo, variable, name, set, timeout).await
	}

	/// Read an entire SDO object, picking segmented or block transfer once up front.
	///
	/// `size_hint`, if given, sizes the receive buffer for a segmented read; it has no effect on a
	/// block transfer. See [`sdo::SdoStream`] for the underlying streaming handle.
	pub async fn sdo_read_stream(&self, object: ObjectIndex, size_hint: Option<usize>, block_transfer: bool, timeout: Duration) -> Result<Vec<u8>, sdo::SdoError> {
		let sdo = self.network.sdo_address();
		let stream = sdo::SdoStream::open(self.node_id, sdo, object, sdo::OpenMode::Read, size_hint, block_transfer);
		stream.read_to_end(&mut self.network.bus().await, timeout).await
	}

	/// Write an entire SDO object, picking segmented or block transfer once up front.
	pub async fn sdo_write_stream(&self, object: ObjectIndex, data: &[u8], block_transfer: bool, timeout: Duration) -> Result<(), sdo::SdoError> {
		let sdo = self.network.sdo_address();
		let stream = sdo::SdoStream::open(self.node_id, sdo, object, sdo::OpenMode::Write, None, block_transfer);
		stream.write_all(&mut self.network.bus().await, data, timeout).await
	}

	/// Send an NMT command and wait for this node to report the resulting state via heartbeat.
	pub async fn send_nmt_command(&self, command: nmt::NmtCommand, timeout: Duration) -> Result<(), nmt::NmtError> {
		self.network.bus().await.send_nmt_command(self.node_id, command, timeout).await
	}

	/// Send an NMT command without waiting for the node to confirm the resulting state.
	pub async fn send_nmt_command_no_wait(&self, command: nmt::NmtCommand) -> Result<(), nmt::NmtError> {
		self.network.bus().await.send_nmt_command_no_wait(self.node_id, command).await
	}

	/// Wait for the next heartbeat from this node, up to `timeout`.
	///
	/// The node must already be guarded (see [`Self::guard_heartbeat`]); if it is not, this waits
	/// until `timeout` elapses and returns [`nmt::NmtError::Timeout`].
	pub async fn wait_for_heartbeat(&self, timeout: Duration) -> Result<nmt::NodeStatus, nmt::NmtError> {
		self.network.heartbeats().wait_for_heartbeat(self.node_id, timeout).await
	}

	/// Read the full configuration of one of this node's RPDOs.
	pub async fn read_rpdo_configuration(&self, pdo: u16, timeout: Duration) -> Result<pdo::RpdoConfiguration, pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.read_rpdo_configuration(self.node_id, sdo, pdo, timeout).await
	}

	/// Read the full configuration of one of this node's TPDOs.
	pub async fn read_tpdo_configuration(&self, pdo: u16, timeout: Duration) -> Result<pdo::TpdoConfiguration, pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.read_tpdo_configuration(self.node_id, sdo, pdo, timeout).await
	}

	/// Configure one of this node's RPDOs.
	pub async fn configure_rpdo(&self, pdo: u16, config: &pdo::RpdoConfiguration, timeout: Duration) -> Result<(), pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.configure_rpdo(self.node_id, sdo, pdo, config, timeout).await
	}

	/// Configure one of this node's TPDOs.
	pub async fn configure_tpdo(&self, pdo: u16, config: &pdo::TpdoConfiguration, timeout: Duration) -> Result<(), pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.configure_tpdo(self.node_id, sdo, pdo, config, timeout).await
	}

	/// Enable or disable one of this node's RPDOs.
	pub async fn enable_rpdo(&self, pdo: u16, enable: bool, timeout: Duration) -> Result<(), pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.enable_rpdo(self.node_id, sdo, pdo, enable, timeout).await
	}

	/// Start tracking live reception of one of this node's RPDOs.
	///
	/// Call this after reading or configuring the RPDO (see [`Self::read_rpdo_configuration`]),
	/// once its COB-ID and mapping are known; frames received before registering are not tracked.
	pub fn register_rpdo_reception(&self, pdo: u16, config: &pdo::RpdoConfiguration) {
		self.network.rpdo().register(self.node_id, pdo, config.communication.cob_id, config.mapping.clone());
	}

	/// Stop tracking live reception of one of this node's RPDOs.
	pub fn forget_rpdo_reception(&self, pdo: u16) {
		self.network.rpdo().forget(self.node_id, pdo);
	}

	/// Block until the next frame for this RPDO arrives, up to `timeout`.
	///
	/// Returns the reception timestamp. The RPDO must already be registered (see
	/// [`Self::register_rpdo_reception`]); if it is not, this returns
	/// [`pdo::PdoReceptionError::NotRegistered`] immediately.
	pub async fn wait_for_rpdo(&self, pdo: u16, timeout: Duration) -> Result<Instant, pdo::PdoReceptionError> {
		let reception = self.network.rpdo().get(self.node_id, pdo)
			.ok_or(pdo::PdoReceptionError::NotRegistered { node_id: self.node_id, pdo })?;
		reception.wait_for_reception(timeout).await
	}

	/// Get the most recently received (and unpacked) values for one of this node's RPDOs, if a
	/// frame has arrived since it was registered.
	pub fn last_rpdo_values(&self, pdo: u16) -> Option<Vec<u64>> {
		self.network.rpdo().get(self.node_id, pdo)?.last_values()
	}

	/// Get the timestamp of the last received frame for one of this node's RPDOs.
	pub fn last_rpdo_reception(&self, pdo: u16) -> Option<Instant> {
		self.network.rpdo().get(self.node_id, pdo)?.last_reception()
	}

	/// Register a callback to run every time one of this node's RPDOs is received and unpacked.
	///
	/// The RPDO must already be registered (see [`Self::register_rpdo_reception`]); no-op if it
	/// is not. Callbacks run synchronously on the dispatcher's receive thread and must not block.
	pub fn add_rpdo_callback<F>(&self, pdo: u16, callback: F)
	where
		F: Fn(&[u64], Instant) + Send + Sync + 'static,
	{
		if let Some(reception) = self.network.rpdo().get(self.node_id, pdo) {
			reception.add_callback(callback);
		}
	}

	/// Enable or disable one of this node's TPDOs.
	pub async fn enable_tpdo(&self, pdo: u16, enable: bool, timeout: Duration) -> Result<(), pdo::PdoConfigError> {
		let sdo = self.network.sdo_address();
		self.network.bus().await.enable_tpdo(self.node_id, sdo, pdo, enable, timeout).await
	}

	/// Start guarding this node's heartbeat, expecting one at least every `heartbeat_time`.
	pub fn guard_heartbeat(&self, heartbeat_time: Duration) {
		self.network.heartbeats().guard(self.node_id, heartbeat_time);
	}

	/// Stop guarding this node's heartbeat.
	pub fn forget_heartbeat(&self) {
		self.network.heartbeats().forget(self.node_id);
	}

	/// This node's last known liveness status, if it is being guarded.
	pub fn status(&self) -> Option<nmt::NodeStatus> {
		self.network.heartbeats().status(self.node_id)
	}

	/// The active (unacknowledged) emergency errors reported by this node.
	pub fn active_errors(&self) -> Vec<emcy::EmergencyEvent> {
		self.network.emcy().active_errors(self.node_id)
	}
}
