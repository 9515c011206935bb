#![allow(dead_code)]

use crate::mockbus::{EpError, MockBus};
use usb_device::class::UsbClass;

pub const APP_IDLE: u8 = 0;
pub const APP_DETACH: u8 = 1;
pub const DFU_IDLE: u8 = 2;
pub const DFU_DNLOAD_SYNC: u8 = 3;
pub const DFU_DN_BUSY: u8 = 4;
pub const DFU_DNLOAD_IDLE: u8 = 5;
pub const DFU_MANIFEST_SYNC: u8 = 6;
pub const DFU_MANIFEST: u8 = 7;
pub const DFU_MANIFEST_WAIT_RESET: u8 = 8;
pub const DFU_UPLOAD_IDLE: u8 = 9;
pub const DFU_ERROR: u8 = 10;

pub const STATUS_OK: u8 = 0x00;
pub const STATUS_ERR_WRITE: u8 = 0x03;
pub const STATUS_ERR_ERASE: u8 = 0x04;
pub const STATUS_ERR_ADDRESS: u8 = 0x08;
pub const STATUS_ERR_NOTDONE: u8 = 0x09;
pub const STATUS_ERR_USBR: u8 = 0x0C;
pub const STATUS_ERR_STALLED_PKT: u8 = 0x0F;

const REQ_DETACH: u8 = 0x00;
const REQ_DNLOAD: u8 = 0x01;
const REQ_UPLOAD: u8 = 0x02;
const REQ_GETSTATUS: u8 = 0x03;
const REQ_CLRSTATUS: u8 = 0x04;
const REQ_GETSTATE: u8 = 0x05;
const REQ_ABORT: u8 = 0x06;

type Transact<'a, T> =
    dyn FnMut(&mut T, &[u8], Option<&[u8]>, &mut [u8]) -> Result<usize, EpError> + 'a;

fn setup_packet(dir_to_host: bool, req: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let bm_request_type = 0x21 | if dir_to_host { 0x80 } else { 0x00 };
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [bm_request_type, req, v[0], v[1], i[0], i[1], l[0], l[1]]
}

/// Convenience wrappers for driving the six DFU control requests over a
/// [`MockBus`]-backed `transact` closure.
pub trait DfuHarness<T: UsbClass<MockBus>> {
    fn download(&mut self, cls: &mut T, data: &[u8]) -> Result<Vec<u8>, EpError>;
    fn upload(&mut self, cls: &mut T, block_num: u16, length: u16) -> Result<Vec<u8>, EpError>;
    fn get_status(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError>;
    fn clear_status(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError>;
    fn get_state(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError>;
    fn abort(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError>;
    fn detach(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError>;
}

impl<'a, T: UsbClass<MockBus>> DfuHarness<T> for Transact<'a, T> {
    fn download(&mut self, cls: &mut T, data: &[u8]) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(false, REQ_DNLOAD, 0, 0, data.len() as u16);
        let payload = if data.is_empty() { None } else { Some(data) };
        let mut out = [0u8; 1024];
        let n = (self)(cls, &setup, payload, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn upload(&mut self, cls: &mut T, block_num: u16, length: u16) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(true, REQ_UPLOAD, block_num, 0, length);
        let mut out = [0u8; 1024];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn get_status(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(true, REQ_GETSTATUS, 0, 0, 6);
        let mut out = [0u8; 6];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn clear_status(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(false, REQ_CLRSTATUS, 0, 0, 0);
        let mut out = [0u8; 8];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn get_state(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(true, REQ_GETSTATE, 0, 0, 1);
        let mut out = [0u8; 8];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn abort(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(false, REQ_ABORT, 0, 0, 0);
        let mut out = [0u8; 8];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }

    fn detach(&mut self, cls: &mut T) -> Result<Vec<u8>, EpError> {
        let setup = setup_packet(false, REQ_DETACH, 0, 0, 0);
        let mut out = [0u8; 8];
        let n = (self)(cls, &setup, None, &mut out)?;
        Ok(out[..n].to_vec())
    }
}

pub fn status(status: u8, poll_timeout: u32, state: u8) -> [u8; 6] {
    let t = poll_timeout.to_le_bytes();
    [status, t[0], t[1], t[2], state, 0]
}
