//! Device session: the command set of one connected logger.
//!
//! A [`Session`] owns its [`Port`] exclusively. Commands are strictly
//! sequential: each one flushes stale input, writes a 16-byte frame and
//! reads its complete response before the next is sent.

use {
    crate::{
        error::{Error, Result},
        model::Model,
        port::Port,
        protocol::{
            command::{BLOCK_SIZE, Command, DeviceMode},
            response::{self, CountReply, HEADER_LEN, IdentifyInfo, MODEL_CHECKCODE, ModelReply, Reply},
        },
        purge::{DEFAULT_MAX_BUSY_POLLS, PurgeOps, PurgeReport, PurgeStrategy, PurgeVariant},
        record::{RECORD_SIZE, Record, RecordDecoder},
        track::Tracks,
    },
    log::{debug, error, info, trace},
};

/// Protocol session with one logger.
pub struct Session<P: Port> {
    port: P,
    model: Model,
    variant_override: Option<PurgeVariant>,
    max_busy_polls: u32,
    decoder: RecordDecoder,
    interrupted: fn() -> bool,
    closed: bool,
}

impl<P: Port> Session<P> {
    /// Start a session on an open port.
    ///
    /// Stale input is discarded. The model is [`Model::default`] until
    /// [`detect_model`](Self::detect_model) succeeds.
    pub fn new(mut port: P) -> Result<Self> {
        port.flush_input()?;
        debug!("Session opened on {}", port.name());
        Ok(Self {
            port,
            model: Model::default(),
            variant_override: None,
            max_busy_polls: DEFAULT_MAX_BUSY_POLLS,
            decoder: RecordDecoder::new(),
            interrupted: crate::is_interrupted_requested,
            closed: false,
        })
    }

    /// Force a purge variant instead of the model's.
    #[must_use]
    pub fn with_purge_variant(mut self, variant: Option<PurgeVariant>) -> Self {
        self.variant_override = variant;
        self
    }

    /// Set the busy-poll limit used during purge.
    #[must_use]
    pub fn with_max_busy_polls(mut self, polls: u32) -> Self {
        self.max_busy_polls = polls.max(1);
        self
    }

    /// Replace the record decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: RecordDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the interruption check consulted between downloaded blocks.
    #[must_use]
    pub fn with_interrupt_checker(mut self, checker: fn() -> bool) -> Self {
        self.interrupted = checker;
        self
    }

    /// Current model.
    pub fn model(&self) -> Model {
        self.model
    }

    /// Override the model without querying the device.
    pub fn set_model(&mut self, model: Model) {
        self.model = model;
    }

    /// Purge variant a [`purge`](Self::purge) call would run.
    pub fn purge_variant(&self) -> PurgeVariant {
        self.variant_override
            .unwrap_or_else(|| self.model.purge_variant())
    }

    /// Underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Send one command.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        self.port.flush_input()?;
        let frame = command.build();
        trace!("Send: {frame:02X?}");
        self.port.write_frame(&frame)
    }

    /// Read `n` bytes with no envelope.
    pub fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        let data = self.port.read_bytes(n)?;
        trace!("Read: {data:02X?}");
        Ok(data)
    }

    /// Read one response envelope.
    ///
    /// Returns `None` when the device answered with a negative size.
    pub fn read_response(&mut self) -> Result<Option<Vec<u8>>> {
        let header = self.read_raw(HEADER_LEN)?;
        let Some(size) = response::parse_header(&header)? else {
            debug!("Device reported an error: {header:02X?}");
            return Ok(None);
        };
        debug!("Reading {size} bytes...");
        let payload = self.read_raw(size)?;
        if payload.len() != size {
            return Err(Error::Protocol(format!(
                "payload size mismatch: header declares {size}, got {}",
                payload.len()
            )));
        }
        Ok(Some(payload))
    }

    /// Read a response and decode it with a fixed layout.
    pub fn read_reply<R: Reply>(&mut self) -> Result<R> {
        let payload = self
            .read_response()?
            .ok_or_else(|| Error::Protocol("device returned no payload".into()))?;
        R::decode(&payload)
    }

    fn request(&mut self, command: &Command) -> Result<Option<Vec<u8>>> {
        self.send(command)?;
        self.read_response()
    }

    /// Select the device operating mode.
    pub fn switch_mode(&mut self, mode: DeviceMode) -> Result<()> {
        debug!("Switching to {mode:?} mode");
        self.send(&Command::switch_mode(mode))?;
        self.read_raw(1)?;
        Ok(())
    }

    /// Query serial number and firmware versions.
    pub fn identify(&mut self) -> Result<IdentifyInfo> {
        self.send(&Command::identify())?;
        let info: IdentifyInfo = self.read_reply()?;
        debug!("Serial: {}", info.serial);
        debug!("Ver: {}.{}", info.version_major, info.version_minor);
        debug!("Model: {:#06x}", info.model);
        debug!("USBlib: {:#06x}", info.usb_library);
        Ok(info)
    }

    /// Query the model code and update the model.
    ///
    /// A wrong checkcode is logged and leaves the model unchanged. Returns
    /// the model in effect afterwards.
    pub fn detect_model(&mut self) -> Result<Model> {
        self.send(&Command::model())?;
        let reply: ModelReply = self.read_reply()?;
        if reply.checkcode != MODEL_CHECKCODE {
            error!(
                "Unexpected result from model query: {:#06x}",
                reply.checkcode
            );
            return Ok(self.model);
        }
        let model = Model::from_code(reply.model_code).ok_or(Error::UnknownModel(reply.model_code))?;
        info!("Found device: {model}");
        self.model = model;
        Ok(model)
    }

    /// Number of stored records.
    pub fn count(&mut self) -> Result<u32> {
        self.send(&Command::count())?;
        let reply: CountReply = self.read_reply()?;
        let total = reply.total();
        debug!("Num DP: {total} ({} {})", reply.high, reply.low);
        Ok(total)
    }

    /// Read `size` bytes of flash at `pos`.
    pub fn flash_read(&mut self, pos: u32, size: u16) -> Result<Option<Vec<u8>>> {
        self.request(&Command::flash_read(pos, size))
    }

    /// Erase the block containing `pos`.
    pub fn flash_write_purge(&mut self, pos: u32) -> Result<Option<Vec<u8>>> {
        self.request(&Command::flash_erase(pos))
    }

    /// See [`Command::unk_write1`].
    pub fn unk_write1(&mut self, p1: u8) -> Result<Option<Vec<u8>>> {
        self.request(&Command::unk_write1(p1))
    }

    /// See [`Command::unk_write2`].
    pub fn unk_write2(&mut self, p1: u16) -> Result<Option<Vec<u8>>> {
        self.request(&Command::unk_write2(p1))
    }

    /// See [`Command::unk_purge1`].
    pub fn unk_purge1(&mut self, p1: u8) -> Result<Option<Vec<u8>>> {
        self.request(&Command::unk_purge1(p1))
    }

    /// See [`Command::unk_purge2`].
    pub fn unk_purge2(&mut self, p1: u8) -> Result<Option<Vec<u8>>> {
        self.request(&Command::unk_purge2(p1))
    }

    /// Iterate over every stored record.
    ///
    /// The record count is queried up front. Flash is read lazily one block
    /// at a time starting at block 1.
    pub fn records(&mut self) -> Result<Records<'_, P>> {
        let total = self.count()?;
        Ok(Records {
            session: self,
            total,
            next_index: 0,
            block: 0,
            buffer: Vec::new(),
            offset: 0,
            done: false,
        })
    }

    /// Iterate over the tracks on the device.
    pub fn tracks(&mut self) -> Result<Tracks<Records<'_, P>>> {
        Ok(Tracks::new(self.records()?))
    }

    /// Erase all recorded data with the selected purge variant.
    ///
    /// Not interruptible.
    pub fn purge(&mut self, progress: &mut dyn FnMut(u32, u32)) -> Result<PurgeReport> {
        let strategy = self
            .purge_variant()
            .strategy(self.max_busy_polls);
        self.purge_with(strategy.as_ref(), progress)
    }

    /// Run a specific purge strategy.
    pub fn purge_with(
        &mut self,
        strategy: &dyn PurgeStrategy,
        progress: &mut dyn FnMut(u32, u32),
    ) -> Result<PurgeReport> {
        let model = self.model;
        info!(
            "Purging {model} ({} blocks, {} sequence)",
            model.block_count(),
            strategy.variant()
        );
        strategy.run(self, model, progress)
    }

    /// Close the port. Further commands fail.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing {}", self.port.name());
        self.port.close()
    }
}

impl<P: Port> Drop for Session<P> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing port: {e}");
        }
    }
}

impl<P: Port> PurgeOps for Session<P> {
    fn flash_read(&mut self, pos: u32, size: u16) -> Result<Option<Vec<u8>>> {
        Session::flash_read(self, pos, size)
    }

    fn flash_write_purge(&mut self, pos: u32) -> Result<Option<Vec<u8>>> {
        Session::flash_write_purge(self, pos)
    }

    fn unk_write1(&mut self, p1: u8) -> Result<Option<Vec<u8>>> {
        Session::unk_write1(self, p1)
    }

    fn unk_write2(&mut self, p1: u16) -> Result<Option<Vec<u8>>> {
        Session::unk_write2(self, p1)
    }

    fn unk_purge1(&mut self, p1: u8) -> Result<Option<Vec<u8>>> {
        Session::unk_purge1(self, p1)
    }
}

/// Lazy record stream, see [`Session::records`].
///
/// Ends after the first error.
pub struct Records<'a, P: Port> {
    session: &'a mut Session<P>,
    total: u32,
    next_index: u32,
    block: u32,
    buffer: Vec<u8>,
    offset: usize,
    done: bool,
}

impl<P: Port> Records<'_, P> {
    /// Record count reported by the device.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Records decoded so far.
    pub fn decoded(&self) -> u32 {
        self.next_index
    }

    fn load_next_block(&mut self) -> Result<()> {
        if (self.session.interrupted)() {
            return Err(Error::Interrupted);
        }
        let block = self.block + 1;
        // The model may still be the fallback, so bound by the largest flash.
        let blocks = Model::MAX_BLOCK_COUNT;
        if block > blocks {
            return Err(Error::Protocol(format!(
                "record count {} exceeds the largest known flash ({blocks} blocks)",
                self.total
            )));
        }
        let data = self
            .session
            .flash_read(block * BLOCK_SIZE, BLOCK_SIZE as u16)?
            .ok_or_else(|| Error::Protocol(format!("flash read of block {block} returned no data")))?;
        if data.len() < RECORD_SIZE {
            return Err(Error::Protocol(format!(
                "flash read of block {block} returned {} bytes",
                data.len()
            )));
        }
        self.block = block;
        self.buffer = data;
        self.offset = 0;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Record> {
        if self.offset + RECORD_SIZE > self.buffer.len() {
            self.load_next_block()?;
        }
        let slot = &self.buffer[self.offset..self.offset + RECORD_SIZE];
        let record = self.session.decoder.decode(self.next_index, slot)?;
        self.offset += RECORD_SIZE;
        self.next_index += 1;
        if self.next_index >= self.total {
            debug!("End by count: {}", self.total);
        }
        Ok(record)
    }
}

impl<P: Port> Iterator for Records<'_, P> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_index >= self.total {
            return None;
        }
        let result = self.next_record();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else {
            (self.total - self.next_index) as usize
        };
        (0, Some(remaining))
    }
}
