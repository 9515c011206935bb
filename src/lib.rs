#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
//!
//! Implements the DFU 1.0 protocol state machine for a `usb-device` device,
//! plus the power-on boot decision that chooses between entering DFU mode
//! and jumping to the resident application.
//!
//! ## About
//!
//! DFU lets a USB device's firmware be upgraded over a standard control
//! pipe. The device's firmware is typically split into a small bootloader
//! and a larger application; at power-on the bootloader decides whether to
//! run the application or wait for a host to push a new image.
//!
//! This library implements classic DFU 1.0: `DNLOAD`/`UPLOAD` target
//! addresses come from a running write cursor rather than the
//! `DFU_SE_COMMAND` address-pointer sub-protocol of DfuSe/1.1a. It does not
//! implement DfuSe's `SET_ADDRESS_POINTER`/`ERASE`/`ERASE_ALL` commands.
//!
//! Programming, erasing, and reading flash are not part of this crate; they
//! are provided by the user through the [`class::FlashMemory`] trait. The
//! boot decision's platform access (button, LED, persistent flag, hard
//! reset) is likewise provided through [`boot::BootPlatform`].
//!
//! ### Supported operations
//!
//! * Upload (device to host)
//! * Download (host to device)
//!
//! ### Not supported operations
//!
//! * DfuSe address-pointer commands (`SET_ADDRESS_POINTER`, `ERASE`, `ERASE_ALL`, `READ_UNPROTECT`).
//!
//! ### Limitations
//!
//! * Maximum USB transfer size is limited to what `usb-device` supports
//!   for control endpoint transfers, and to [`class::LARGEST_FLASH_PAGE_SIZE`].
//!
//! * iString field in `DFU_GETSTATUS` is always `0`. Vendor-specific error
//!   descriptions are not supported.
//!
//! ## License
//!
//! This project is licensed under [MIT License](https://opensource.org/licenses/MIT)
//! ([LICENSE](https://github.com/vitalyvb/usbd-dfu/blob/main/LICENSE)).
//!
//! ## Example
//!
//! The example below focuses on [`DfuClass`]; target controller
//! initialization (USB, interrupts, GPIO, etc.) is not in scope here.
//!
//! ```no_run
//! use usb_device::prelude::*;
//! use dfu_bootloader_core::*;
//! #
//! # use usb_device::bus::UsbBusAllocator;
//! #
//! # pub struct DummyUsbBus { }
//! # impl usb_device::bus::UsbBus for DummyUsbBus {
//! #     fn alloc_ep(&mut self, _: usb_device::UsbDirection, _: Option<usb_device::endpoint::EndpointAddress>,
//! #                 _: usb_device::endpoint::EndpointType, _: u16, _: u8) -> usb_device::Result<usb_device::endpoint::EndpointAddress> { todo!() }
//! #     fn enable(&mut self) { todo!() }
//! #     fn reset(&self) { todo!() }
//! #     fn set_device_address(&self, _: u8) { todo!() }
//! #     fn write(&self, _: usb_device::endpoint::EndpointAddress, _: &[u8]) -> usb_device::Result<usize> { todo!() }
//! #     fn read(&self, _: usb_device::endpoint::EndpointAddress, _: &mut [u8]) -> usb_device::Result<usize> { todo!() }
//! #     fn set_stalled(&self, _: usb_device::endpoint::EndpointAddress, _: bool) { todo!() }
//! #     fn is_stalled(&self, _: usb_device::endpoint::EndpointAddress) -> bool { todo!() }
//! #     fn suspend(&self) { todo!() }
//! #     fn resume(&self) { todo!() }
//! #     fn poll(&self) -> usb_device::bus::PollResult { todo!() }
//! # }
//! #
//! # let usb_bus_alloc: UsbBusAllocator<DummyUsbBus> = unsafe { core::mem::MaybeUninit::<UsbBusAllocator<DummyUsbBus>>::uninit().assume_init() };
//! # let mut usb_dev = UsbDeviceBuilder::new(&usb_bus_alloc, UsbVidPid(0, 0)).build();
//!
//! // DfuClass uses MyFlash to actually read, erase, or program memory. A
//! // handful of associated consts describe the memory region and tune host
//! // expectations (transfer size, detach timeout).
//!
//! struct MyFlash {
//!     image: [u8; 1024],
//! }
//!
//! impl FlashMemory for MyFlash {
//!     const APP_BASE: u32 = 0x0000_0000;
//!     const MEM_INFO_STRING: &'static str = "@Flash/0x00000000/1*1Kg";
//!     const TRANSFER_SIZE: u16 = 64;
//!
//!     fn app_flash_end(&self) -> u32 {
//!         Self::APP_BASE + self.image.len() as u32
//!     }
//!
//!     fn unlock(&mut self) {}
//!     fn lock(&mut self) {}
//!
//!     fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
//!         let offset = (address - Self::APP_BASE) as usize;
//!         self.image[offset..offset + 64].fill(0xff);
//!         Ok(())
//!     }
//!
//!     fn write_word(&mut self, address: u32, word: u32) -> Result<(), FlashError> {
//!         let offset = (address - Self::APP_BASE) as usize;
//!         self.image[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
//!         Ok(())
//!     }
//!
//!     fn read(&self, address: u32, length: usize) -> &[u8] {
//!         let offset = (address - Self::APP_BASE) as usize;
//!         &self.image[offset..offset + length]
//!     }
//! }
//!
//! let my_flash = MyFlash { image: [0xffu8; 1024] };
//!
//! // Create USB device for a target device:
//! // let usb_bus_alloc = UsbBus::new(peripheral);
//! // let usb_dev = UsbDeviceBuilder::new().build();
//!
//! // Create the DFU USB class.
//! let mut dfu = DfuClass::new(&usb_bus_alloc, my_flash);
//!
//! // usb_dev.poll() must be called periodically, usually from the USB
//! // interrupt handler. When a download completes, MyFlash's methods run.
//! usb_dev.poll(&mut [&mut dfu]);
//! ```

/// DFU protocol engine and flash interface.
pub mod class;
/// Power-on boot decision.
pub mod boot;

#[doc(inline)]
pub use crate::boot::{decide, BlinkCadence, BootAction, BootFlag, BootPlatform};
#[doc(inline)]
pub use crate::class::{DfuClass, DfuState, DfuStatusCode, FlashError, FlashMemory};
