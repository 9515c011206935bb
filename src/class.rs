use core::marker::PhantomData;
use usb_device::{class_prelude::*, control::Request};

const USB_CLASS_APPLICATION_SPECIFIC: u8 = 0xFE;
const USB_SUBCLASS_DFU: u8 = 0x01;
const USB_PROTOCOL_DFU_MODE: u8 = 0x02;

const DFU_DETACH: u8 = 0x00;
const DFU_DNLOAD: u8 = 0x01;
const DFU_UPLOAD: u8 = 0x02;
const DFU_GETSTATUS: u8 = 0x03;
const DFU_CLRSTATUS: u8 = 0x04;
const DFU_GETSTATE: u8 = 0x05;
const DFU_ABORT: u8 = 0x06;

const DESC_DESCTYPE_DFU: u8 = 0x21;

/// Size of the page-aligned scratch buffer that backs every DNLOAD block.
///
/// Sized to the largest flash page across boards this core expects to run
/// on; a `FlashMemory` implementation whose `TRANSFER_SIZE` exceeds this
/// will simply never have its excess bytes written.
pub const LARGEST_FLASH_PAGE_SIZE: usize = 2048;

/// DFU state, as reported in `bState`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DfuState {
    /// Device is running its normal application. Not reachable from this core.
    #[allow(dead_code)]
    AppIdle = 0,
    /// Device received DFU_DETACH and awaits a USB reset. Not reachable from this core.
    #[allow(dead_code)]
    AppDetach = 1,
    /// Device is in DFU mode, waiting for a command.
    DfuIdle = 2,
    /// Device has received a block and awaits DFU_GETSTATUS to commit it.
    DfuDnloadSync = 3,
    /// Device is programming a block into flash. Unreachable while flash writes are synchronous.
    #[allow(dead_code)]
    DfuDnBusy = 4,
    /// Device committed a block and awaits the next DFU_DNLOAD.
    DfuDnloadIdle = 5,
    /// Device has received the last block and awaits DFU_GETSTATUS to begin manifestation.
    DfuManifestSync = 6,
    /// Device is manifesting the new image. Not reachable; manifestation is synchronous with GETSTATUS.
    #[allow(dead_code)]
    DfuManifest = 7,
    /// Device has programmed the image and awaits a USB or power-on reset.
    DfuManifestWaitReset = 8,
    /// Device is expecting further DFU_UPLOAD requests.
    DfuUploadIdle = 9,
    /// An error condition is present; awaiting DFU_CLRSTATUS.
    DfuError = 10,
}

/// DFU status code, as reported in `bStatus`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DfuStatusCode {
    /// No error condition is present.
    Ok = 0x00,
    /// File is not targeted for use by this device.
    ErrTarget = 0x01,
    /// File is for this device but fails some vendor-specific verification test.
    ErrFile = 0x02,
    /// Device is unable to write memory.
    ErrWrite = 0x03,
    /// Memory erase function failed.
    ErrErase = 0x04,
    /// Memory erase check failed.
    ErrCheckErased = 0x05,
    /// Program memory function failed.
    ErrProg = 0x06,
    /// Programmed memory failed verification.
    ErrVerify = 0x07,
    /// Cannot program memory due to a received address that is out of range.
    ErrAddress = 0x08,
    /// Received DFU_DNLOAD with wLength = 0, but device does not think it has all of the data yet.
    ErrNotdone = 0x09,
    /// Device's firmware is corrupt. It cannot return to run-time operation.
    ErrFirmware = 0x0A,
    /// iString indicates a vendor-specific error.
    ErrVendor = 0x0B,
    /// Device detected unexpected USB reset signalling.
    ErrUsbr = 0x0C,
    /// Device detected unexpected power-on reset.
    ErrPor = 0x0D,
    /// Something went wrong, but the device does not know what it was.
    ErrUnknown = 0x0E,
    /// Device stalled an unexpected request.
    ErrStalledPkt = 0x0F,
}

/// Error returned by a [`FlashMemory`] operation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum FlashError {
    /// The flash controller reported a write failure.
    Write,
    /// The flash controller reported an erase failure.
    Erase,
    /// The requested address lies outside the writable region.
    Address,
}

impl From<FlashError> for DfuStatusCode {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::Write => DfuStatusCode::ErrWrite,
            FlashError::Erase => DfuStatusCode::ErrErase,
            FlashError::Address => DfuStatusCode::ErrAddress,
        }
    }
}

/// The target's internal flash, as seen by the DFU engine (components C2/C3).
///
/// "Page" means the smallest erasable unit of flash; "block" means a single
/// DNLOAD/UPLOAD transfer, sized `TRANSFER_SIZE`.
pub trait FlashMemory {
    /// Fixed start of the writable application region (`APP_BASE`).
    const APP_BASE: u32;

    /// USB interface string describing the memory region, e.g. `"@Flash/0x08002000/120*1Kg"`.
    const MEM_INFO_STRING: &'static str;

    /// Maximum size of a DNLOAD/UPLOAD block. Must not exceed [`LARGEST_FLASH_PAGE_SIZE`].
    const TRANSFER_SIZE: u16 = 1024;

    /// `wDetachTimeOut` reported in the DFU functional descriptor.
    const DETACH_TIMEOUT: u16 = 250;

    /// Whether the DFU descriptor advertises download support.
    const HAS_DOWNLOAD: bool = true;

    /// Whether the DFU descriptor advertises upload support.
    const HAS_UPLOAD: bool = true;

    /// End of the writable application region (`APP_END`). A method, not a
    /// constant, because on some targets flash size is read from a register.
    fn app_flash_end(&self) -> u32;

    /// Removes flash write protection. Called once on DFU entry.
    fn unlock(&mut self);

    /// Reinstates flash write protection. Called on the zero-length DNLOAD
    /// that starts manifestation.
    fn lock(&mut self);

    /// Erases the page containing `addr`.
    fn erase_page(&mut self, addr: u32) -> Result<(), FlashError>;

    /// Programs one 32-bit word at `addr`. `addr` is always word-aligned.
    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError>;

    /// Returns `length` bytes of flash starting at `address`, for UPLOAD.
    /// Flash is memory-mapped on the targets this core runs on, so this
    /// cannot fail; the engine only calls it with a range it has already
    /// checked against the memory region.
    fn read(&self, address: u32, length: usize) -> &[u8];
}

#[derive(Clone, Copy)]
struct DfuStatus {
    status: DfuStatusCode,
    state: DfuState,
}

impl DfuStatus {
    fn new() -> Self {
        Self {
            status: DfuStatusCode::Ok,
            state: DfuState::DfuIdle,
        }
    }

    fn new_state_ok(&mut self, state: DfuState) {
        self.status = DfuStatusCode::Ok;
        self.state = state;
    }

    fn new_state_status(&mut self, state: DfuState, status: DfuStatusCode) {
        self.status = status;
        self.state = state;
    }
}

impl From<DfuStatus> for [u8; 6] {
    fn from(s: DfuStatus) -> Self {
        [
            s.status as u8,
            // bwPollTimeout: every state this core reaches replies immediately.
            0,
            0,
            0,
            s.state as u8,
            // iString: no vendor status strings.
            0,
        ]
    }
}

/// DFU 1.0 protocol engine, transfer glue, and flash writer (components C1-C3).
///
/// `B` is the `usb-device` bus; `M` supplies the flash operations this core
/// does not implement itself (see [`FlashMemory`]).
pub struct DfuClass<B: UsbBus, M: FlashMemory> {
    if_num: InterfaceNumber,
    interface_string: StringIndex,
    status: DfuStatus,
    recv_buffer: [u8; LARGEST_FLASH_PAGE_SIZE],
    user_firmware_len: u32,
    this_block_len: u16,
    upload_block_len: u16,
    busy: bool,
    _bus: PhantomData<B>,
    mem: M,
}

impl<B: UsbBus, M: FlashMemory> DfuClass<B, M> {
    /// Creates a new `DfuClass`, unlocking flash for the duration of the DFU session.
    pub fn new(alloc: &UsbBusAllocator<B>, mut mem: M) -> Self {
        mem.unlock();
        Self {
            if_num: alloc.interface(),
            interface_string: alloc.string(),
            status: DfuStatus::new(),
            recv_buffer: [0; LARGEST_FLASH_PAGE_SIZE],
            user_firmware_len: 0,
            this_block_len: 0,
            upload_block_len: 0,
            busy: false,
            _bus: PhantomData,
            mem,
        }
    }

    /// Consumes `self`, returning the owned [`FlashMemory`] implementation.
    pub fn release(self) -> M {
        self.mem
    }

    /// Current `bState`.
    pub fn state(&self) -> DfuState {
        self.status.state
    }

    /// Whether the device has processed at least one DFU request since construction.
    ///
    /// The boot decider polls this to know when to stop its startup blink loop
    /// and yield the main thread to the host's upload.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Bytes committed to flash since DFU entry.
    pub fn firmware_len(&self) -> u32 {
        self.user_firmware_len
    }

    fn stall(&mut self) {
        self.status
            .new_state_status(DfuState::DfuError, DfuStatusCode::ErrStalledPkt);
        #[cfg(feature = "defmt-03")]
        defmt::warn!(
            "dfu: stalled unexpected request in state {:?}",
            self.status.state
        );
    }

    fn download(&mut self, xfer: ControlOut<B>, req: Request) {
        match self.status.state {
            DfuState::DfuIdle => {
                if req.length == 0 {
                    self.status
                        .new_state_status(DfuState::DfuError, DfuStatusCode::ErrNotdone);
                    xfer.reject().ok();
                    return;
                }
                self.user_firmware_len = 0;
                self.accept_block(xfer);
            }
            DfuState::DfuDnloadIdle => {
                if req.length > 0 {
                    self.accept_block(xfer);
                } else {
                    self.mem.lock();
                    self.status.new_state_ok(DfuState::DfuManifestSync);
                    xfer.accept().ok();
                }
            }
            _ => {
                self.stall();
                xfer.reject().ok();
            }
        }
    }

    fn accept_block(&mut self, xfer: ControlOut<B>) {
        let data = xfer.data();
        let len = data.len().min(self.recv_buffer.len());
        self.recv_buffer[..len].copy_from_slice(&data[..len]);
        self.this_block_len = len as u16;
        self.status.new_state_ok(DfuState::DfuDnloadSync);
        xfer.accept().ok();
    }

    fn commit_buffer(&mut self) {
        let target = M::APP_BASE.wrapping_add(self.user_firmware_len);
        let end = target.wrapping_add(self.this_block_len as u32);

        if end < target || target < M::APP_BASE || end > self.mem.app_flash_end() {
            // Silently dropped, cursor untouched: matches the source this
            // core's semantics were distilled from (see DESIGN.md).
            #[cfg(feature = "defmt-03")]
            defmt::error!("dfu: dropping out-of-range block at {:x}", target);
            return;
        }

        let _ = self.mem.erase_page(target);

        let mut off = 0u32;
        while off < self.this_block_len as u32 {
            let word = u32::from_le_bytes([
                self.recv_buffer[off as usize],
                self.recv_buffer[off as usize + 1],
                self.recv_buffer[off as usize + 2],
                self.recv_buffer[off as usize + 3],
            ]);
            let _ = self.mem.write_word(target + off, word);
            off += 4;
        }

        self.user_firmware_len = self
            .user_firmware_len
            .wrapping_add(self.this_block_len as u32);
        self.this_block_len = 0;
    }

    fn upload(&mut self, xfer: ControlIn<B>, req: Request) {
        match self.status.state {
            DfuState::DfuIdle => {
                self.upload_block_len = req.length;
                self.this_block_len = req.length;
                self.user_firmware_len = (req.length as u32).wrapping_mul(req.value as u32);
                self.status.new_state_ok(DfuState::DfuUploadIdle);
            }
            DfuState::DfuUploadIdle => {
                if req.length == 0 {
                    self.status
                        .new_state_status(DfuState::DfuError, DfuStatusCode::ErrNotdone);
                    xfer.reject().ok();
                    return;
                }

                let region_len = self.mem.app_flash_end().wrapping_sub(M::APP_BASE);
                let candidate = (self.upload_block_len as u32).wrapping_mul(req.value as u32);
                self.user_firmware_len = candidate;

                if candidate.wrapping_add(self.upload_block_len as u32) <= region_len {
                    self.this_block_len = self.upload_block_len;
                    self.status.new_state_ok(DfuState::DfuUploadIdle);
                } else {
                    let residual = region_len.wrapping_sub(candidate);
                    self.this_block_len = if residual >= req.length as u32 {
                        0
                    } else {
                        residual as u16
                    };
                    self.status.new_state_ok(DfuState::DfuIdle);
                }
            }
            _ => {
                self.stall();
                xfer.reject().ok();
                return;
            }
        }

        let addr = M::APP_BASE.wrapping_add(self.user_firmware_len);
        let data = self.mem.read(addr, self.this_block_len as usize);
        xfer.accept_with(data).ok();
    }

    fn get_state(&mut self, xfer: ControlIn<B>, req: Request) {
        if req.length == 0 {
            self.stall();
            xfer.reject().ok();
            return;
        }

        match self.status.state {
            // Preserved quirk: GETSTATE from DNLOAD_IDLE falls back to IDLE
            // rather than re-reporting DNLOAD_IDLE, same as GETSTATUS.
            DfuState::DfuDnloadIdle => self.status.new_state_ok(DfuState::DfuIdle),
            DfuState::DfuManifestSync | DfuState::DfuManifest => {
                self.status.new_state_ok(DfuState::DfuManifestWaitReset)
            }
            _ => {}
        }

        xfer.accept_with(&[self.status.state as u8]).ok();
    }

    fn get_status(&mut self, xfer: ControlIn<B>, req: Request) {
        if req.length < 6 {
            self.stall();
            xfer.reject().ok();
            return;
        }

        match self.status.state {
            DfuState::DfuDnloadSync => {
                self.commit_buffer();
                self.status.new_state_ok(DfuState::DfuDnloadIdle);
            }
            // Preserved quirk: GETSTATUS from DNLOAD_IDLE falls back to IDLE
            // rather than re-reporting DNLOAD_IDLE.
            DfuState::DfuDnloadIdle => self.status.new_state_ok(DfuState::DfuIdle),
            DfuState::DfuManifestSync | DfuState::DfuManifest => {
                self.status.new_state_ok(DfuState::DfuManifestWaitReset)
            }
            _ => {}
        }

        let v: [u8; 6] = self.status.into();
        xfer.accept_with(&v).ok();
    }

    fn clear_status(&mut self, xfer: ControlOut<B>) {
        match self.status.state {
            DfuState::DfuError => {
                self.status.new_state_ok(DfuState::DfuIdle);
                xfer.accept().ok();
            }
            _ => {
                self.stall();
                xfer.reject().ok();
            }
        }
    }

    fn abort(&mut self, xfer: ControlOut<B>) {
        match self.status.state {
            DfuState::DfuIdle | DfuState::DfuUploadIdle | DfuState::DfuDnloadIdle => {
                self.status.new_state_ok(DfuState::DfuIdle);
                xfer.accept().ok();
            }
            _ => {
                self.stall();
                xfer.reject().ok();
            }
        }
    }
}

impl<B: UsbBus, M: FlashMemory> UsbClass<B> for DfuClass<B, M> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(
            self.if_num,
            0,
            USB_CLASS_APPLICATION_SPECIFIC,
            USB_SUBCLASS_DFU,
            USB_PROTOCOL_DFU_MODE,
            Some(self.interface_string),
        )?;

        writer.write(
            DESC_DESCTYPE_DFU,
            &[
                // bmAttributes: bitWillDetach | !bitManifestationTolerant | bitCanUpload | bitCanDnload
                0x08 | (if M::HAS_UPLOAD { 0x02 } else { 0 })
                    | (if M::HAS_DOWNLOAD { 0x01 } else { 0 }),
                (M::DETACH_TIMEOUT & 0xff) as u8,
                (M::DETACH_TIMEOUT >> 8) as u8,
                (M::TRANSFER_SIZE & 0xff) as u8,
                (M::TRANSFER_SIZE >> 8) as u8,
                // bcdDFUVersion 1.10. This core speaks no 1.1a/DfuSe download sub-commands.
                0x10,
                0x01,
            ],
        )?;

        Ok(())
    }

    fn get_string(&self, index: StringIndex, lang_id: LangID) -> Option<&str> {
        if index == self.interface_string && (lang_id == LangID::EN_US || u16::from(lang_id) == 0)
        {
            return Some(M::MEM_INFO_STRING);
        }
        None
    }

    fn control_in(&mut self, xfer: ControlIn<B>) {
        let req = *xfer.request();

        if req.request_type != control::RequestType::Class
            || req.recipient != control::Recipient::Interface
            || req.index != u8::from(self.if_num) as u16
        {
            return;
        }

        self.busy = true;

        match req.request {
            DFU_UPLOAD => self.upload(xfer, req),
            DFU_GETSTATUS => self.get_status(xfer, req),
            DFU_GETSTATE => self.get_state(xfer, req),
            _ => {
                self.stall();
                xfer.reject().ok();
            }
        }
    }

    fn control_out(&mut self, xfer: ControlOut<B>) {
        let req = *xfer.request();

        if req.request_type != control::RequestType::Class
            || req.recipient != control::Recipient::Interface
            || req.index != u8::from(self.if_num) as u16
        {
            return;
        }

        self.busy = true;

        match req.request {
            DFU_DNLOAD => self.download(xfer, req),
            DFU_CLRSTATUS => self.clear_status(xfer),
            DFU_ABORT => self.abort(xfer),
            // DFU_DETACH is meaningful only in the application's runtime
            // driver; in DFU mode it is simply another unexpected request.
            DFU_DETACH => {
                self.stall();
                xfer.reject().ok();
            }
            _ => {
                self.stall();
                xfer.reject().ok();
            }
        }
    }

    fn reset(&mut self) {
        // Every state but {IDLE, APP_IDLE, APP_DETACH} signals "unexpected USB
        // reset": this core has no platform hard-reset handle of its own, so
        // it raises ErrUsbr and leaves the boot decider to act on its next
        // poll (see DESIGN.md). DFU_MANIFEST_WAIT_RESET is included on
        // purpose: a bus reset there is the expected end of a successful
        // upgrade, not a fault, but this core cannot distinguish the two and
        // the boot decider treats ErrUsbr-from-manifest-wait as "boot the
        // freshly written image" rather than "stay in DFU".
        match self.status.state {
            DfuState::DfuIdle | DfuState::AppIdle | DfuState::AppDetach => {}
            _ => self
                .status
                .new_state_status(DfuState::DfuError, DfuStatusCode::ErrUsbr),
        }
    }
}
