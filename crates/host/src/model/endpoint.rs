//! Endpoint node

use super::Provenance;
use common::{Direction, EndpointDescriptor, TransferKind};
use record::EndpointRecord;

/// A USB endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: u8,
    attributes: u8,
    interval: u8,
    max_packet_size: u16,
    interface_id: u8,
    provenance: Provenance,
}

impl Endpoint {
    /// Build from a live endpoint descriptor
    pub fn from_descriptor(descriptor: &EndpointDescriptor, interface_id: u8) -> Self {
        Self {
            address: descriptor.address,
            attributes: descriptor.attributes,
            interval: descriptor.interval,
            max_packet_size: descriptor.max_packet_size,
            interface_id,
            provenance: Provenance::Discovered,
        }
    }

    pub fn new(
        address: u8,
        attributes: u8,
        interval: u8,
        max_packet_size: u16,
        interface_id: u8,
    ) -> Self {
        Self {
            address,
            attributes,
            interval,
            max_packet_size,
            interface_id,
            provenance: Provenance::Cached,
        }
    }

    pub fn from_record(record: &EndpointRecord) -> Self {
        Self::new(
            record.address,
            record.attributes,
            record.interval,
            record.max_packet_size,
            record.interface_id,
        )
    }

    /// Export this endpoint; cached endpoints export nothing
    pub fn to_record(&self) -> Option<EndpointRecord> {
        if !self.provenance.is_discovered() {
            return None;
        }
        Some(EndpointRecord {
            address: self.address,
            attributes: self.attributes,
            interval: self.interval,
            max_packet_size: self.max_packet_size,
            interface_id: self.interface_id,
        })
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn attributes(&self) -> u8 {
        self.attributes
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn interface_id(&self) -> u8 {
        self.interface_id
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Raw direction bit: 0x80 for IN, 0 for OUT
    pub fn direction(&self) -> u8 {
        self.address & 0x80
    }

    /// Endpoint number (address bits 0-3)
    pub fn number(&self) -> u8 {
        self.address & 0x0F
    }

    pub fn endpoint_number(&self) -> u8 {
        self.number()
    }

    /// Raw transfer type (attribute bits 0-1)
    pub fn transfer_type(&self) -> u8 {
        self.attributes & 0x03
    }

    pub fn transfer_kind(&self) -> TransferKind {
        TransferKind::from_attributes(self.attributes)
    }

    pub fn direction_kind(&self) -> Direction {
        Direction::from_address(self.address)
    }

    pub fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    pub fn set_attributes(&mut self, attributes: u8) {
        self.attributes = attributes;
    }

    pub fn set_interval(&mut self, interval: u8) {
        self.interval = interval;
    }

    pub fn set_max_packet_size(&mut self, max_packet_size: u16) {
        self.max_packet_size = max_packet_size;
    }

    pub fn set_interface_id(&mut self, interface_id: u8) {
        self.interface_id = interface_id;
    }
}
