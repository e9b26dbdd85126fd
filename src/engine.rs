//! # Dispatch engine
//!
//! [`ModbusEngine`] owns a codec and turns each decoded package into an
//! application callback. It is driven by [`ModbusEngine::tick`], which decodes
//! at most one package, dispatches it, and flushes pending output.
//!
//! ## Slave dispatch
//!
//! | Incoming request | Action | Outcome |
//! |------------------|--------|---------|
//! | unit is not ours | forward hook | `Forwarded` |
//! | unit is broadcast (0) | forward hook | `Forwarded` |
//! | hook registered | hook called | `Dispatched` |
//! | no hook | Illegal Function exception reply | `ExceptionSent` |
//!
//! ## Master dispatch
//!
//! Replies go to the hook registered for their function (exception bit masked)
//! or are dropped.
//!
//! ## Example
//!
//! ```rust
//! use modbus_engine::{ModbusEngine, ModbusFunction, Message, Reply, Role, RtuCodec};
//! use modbus_engine::transport::MemoryTransport;
//!
//! let mut engine = ModbusEngine::new(Role::Slave, 1, RtuCodec::new(MemoryTransport::new()));
//! engine.on(ModbusFunction::ReadHoldingRegisters, |_unit, message, responder| {
//!     if let Message::Request(request) = message {
//!         if let Ok(mut reply) = Reply::for_request(request) {
//!             let _ = reply.set_words(&vec![0u16; request.count.raw() as usize]);
//!             let _ = responder.reply(reply);
//!         }
//!     }
//! });
//! engine.tick();
//! ```

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::codec::Codec;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{
    MbapHeader, ModbusException, ModbusFunction, Package, PackageBody, Reply, Request, Role,
    SlaveId, BROADCAST_ADDRESS,
};

/// Decoded message handed to a hook
#[derive(Debug, Clone, Copy)]
pub enum Message<'a> {
    Request(&'a Request),
    Reply(&'a Reply),
}

/// Application callback for one function code
pub type Hook = Box<dyn FnMut(SlaveId, Message<'_>, &mut Responder<'_>) + Send>;

/// Callback for requests addressed to another unit or broadcast
pub type ForwardHook = Box<dyn FnMut(SlaveId, &Request) + Send>;

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing complete to decode
    Idle,
    /// A hook handled the package
    Dispatched,
    /// Request for another unit (or broadcast) went to the forward hook
    Forwarded,
    /// No hook for the request; an exception reply was queued
    ExceptionSent,
    /// Master received a reply nobody listens for
    Dropped,
    /// Input was rejected by the codec
    Rejected,
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub ticks: u64,
    pub dispatched: u64,
    pub forwarded: u64,
    pub exceptions_sent: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub send_failures: u64,
}

/// Sending side handed to hooks
///
/// Carries the unit and MBAP header of the package being handled so a reply
/// lands on the right transaction.
pub struct Responder<'a> {
    codec: &'a mut dyn Codec,
    logger: Option<&'a CallbackLogger>,
    role: Role,
    unit: SlaveId,
    extra: Option<MbapHeader>,
}

impl<'a> Responder<'a> {
    /// Unit address of the package being handled
    pub fn unit(&self) -> SlaveId {
        self.unit
    }

    pub fn header(&self) -> Option<MbapHeader> {
        self.extra
    }

    /// Queue a reply to the current request
    ///
    /// Broadcast requests are never answered; the reply is silently discarded.
    pub fn reply(&mut self, reply: Reply) -> ModbusResult<()> {
        if self.unit == BROADCAST_ADDRESS {
            return Ok(());
        }
        let package = Package::reply(self.unit, reply).with_header(self.extra);
        self.send(package)
    }

    /// Queue a new request, typically the next poll from a master hook
    pub fn request(&mut self, unit: SlaveId, request: Request) -> ModbusResult<()> {
        self.send(Package::request(unit, request))
    }

    fn send(&mut self, package: Package) -> ModbusResult<()> {
        if let Some(logger) = self.logger {
            logger.log_package("->", &package);
        }
        self.codec.encode(self.role, &package)
    }
}

/// Poll-driven Modbus engine
pub struct ModbusEngine<C: Codec> {
    role: Role,
    unit_address: SlaveId,
    codec: C,
    hooks: HashMap<ModbusFunction, Hook>,
    forward: Option<ForwardHook>,
    stats: EngineStats,
    logger: Option<CallbackLogger>,
}

impl<C: Codec> ModbusEngine<C> {
    /// Create an engine
    ///
    /// `unit_address` is the local unit for a slave; a master ignores it.
    pub fn new(role: Role, unit_address: SlaveId, codec: C) -> Self {
        Self {
            role,
            unit_address,
            codec,
            hooks: HashMap::new(),
            forward: None,
            stats: EngineStats::default(),
            logger: None,
        }
    }

    pub fn slave(unit_address: SlaveId, codec: C) -> Self {
        Self::new(Role::Slave, unit_address, codec)
    }

    pub fn master(codec: C) -> Self {
        Self::new(Role::Master, BROADCAST_ADDRESS, codec)
    }

    /// Log every package through `logger`
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Register the hook for `function`, replacing any previous one
    pub fn on<F>(&mut self, function: ModbusFunction, hook: F) -> &mut Self
    where
        F: FnMut(SlaveId, Message<'_>, &mut Responder<'_>) + Send + 'static,
    {
        self.hooks.insert(function, Box::new(hook));
        self
    }

    /// Remove the hook for `function`, returning whether one was registered
    pub fn remove_hook(&mut self, function: ModbusFunction) -> bool {
        self.hooks.remove(&function).is_some()
    }

    /// Register the forward hook
    pub fn on_forward<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(SlaveId, &Request) + Send + 'static,
    {
        self.forward = Some(Box::new(hook));
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn unit_address(&self) -> SlaveId {
        self.unit_address
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut C {
        &mut self.codec
    }

    pub fn into_codec(self) -> C {
        self.codec
    }

    /// Decode at most one package and dispatch it
    pub fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;

        let package = match self.codec.decode(self.role) {
            Ok(package) => package,
            Err(e) if e.is_incomplete() => return TickOutcome::Idle,
            Err(e) => {
                debug!("Rejected input: {}", e);
                self.stats.rejected += 1;
                return TickOutcome::Rejected;
            }
        };

        if let Some(logger) = &self.logger {
            logger.log_package("<-", &package);
        }

        let outcome = match self.role {
            Role::Slave => self.dispatch_request(package),
            Role::Master => self.dispatch_reply(package),
        };

        if let Err(e) = self.codec.flush() {
            warn!("Flush after dispatch failed: {}", e);
            self.stats.send_failures += 1;
        }
        outcome
    }

    fn dispatch_request(&mut self, package: Package) -> TickOutcome {
        let Package { unit, body, extra } = package;
        let request = match body {
            PackageBody::Request(request) => request,
            PackageBody::Reply(_) => {
                self.stats.rejected += 1;
                return TickOutcome::Rejected;
            }
        };

        if unit != self.unit_address || unit == BROADCAST_ADDRESS {
            if let Some(forward) = self.forward.as_mut() {
                forward(unit, &request);
            }
            self.stats.forwarded += 1;
            return TickOutcome::Forwarded;
        }

        let hook = request.function().and_then(|f| self.hooks.get_mut(&f));
        match hook {
            Some(hook) => {
                let mut responder = Responder {
                    codec: &mut self.codec,
                    logger: self.logger.as_ref(),
                    role: self.role,
                    unit,
                    extra,
                };
                hook(unit, Message::Request(&request), &mut responder);
                self.stats.dispatched += 1;
                TickOutcome::Dispatched
            }
            None => {
                debug!(
                    "No hook for {} from unit {}, replying Illegal Function",
                    request.opcode, unit
                );
                let reply = Reply::exception(&request, ModbusException::IllegalFunction);
                if let Err(e) = self.send_reply(unit, reply, extra) {
                    warn!("Exception reply to unit {} failed: {}", unit, e);
                }
                self.stats.exceptions_sent += 1;
                TickOutcome::ExceptionSent
            }
        }
    }

    fn dispatch_reply(&mut self, package: Package) -> TickOutcome {
        let Package { unit, body, extra } = package;
        let reply = match body {
            PackageBody::Reply(reply) => reply,
            PackageBody::Request(_) => {
                self.stats.rejected += 1;
                return TickOutcome::Rejected;
            }
        };

        let hook = reply.function().and_then(|f| self.hooks.get_mut(&f));
        match hook {
            Some(hook) => {
                let mut responder = Responder {
                    codec: &mut self.codec,
                    logger: self.logger.as_ref(),
                    role: self.role,
                    unit,
                    extra,
                };
                hook(unit, Message::Reply(&reply), &mut responder);
                self.stats.dispatched += 1;
                TickOutcome::Dispatched
            }
            None => {
                debug!("Dropping reply {} from unit {}: no hook", reply.opcode, unit);
                self.stats.dropped += 1;
                TickOutcome::Dropped
            }
        }
    }

    /// Encode a request (master only)
    pub fn send_request(&mut self, unit: SlaveId, request: Request) -> ModbusResult<()> {
        if self.role != Role::Master {
            return Err(ModbusError::unsupported("Only a master sends requests"));
        }
        let package = Package::request(unit, request);
        if let Some(logger) = &self.logger {
            logger.log_package("->", &package);
        }
        self.codec.encode(self.role, &package).map_err(|e| {
            self.stats.send_failures += 1;
            e
        })
    }

    /// Encode a reply (slave only); replies to the broadcast unit are skipped
    pub fn send_reply(
        &mut self,
        unit: SlaveId,
        reply: Reply,
        extra: Option<MbapHeader>,
    ) -> ModbusResult<()> {
        if self.role != Role::Slave {
            return Err(ModbusError::unsupported("Only a slave sends replies"));
        }
        if unit == BROADCAST_ADDRESS {
            return Ok(());
        }
        let package = Package::reply(unit, reply).with_header(extra);
        if let Some(logger) = &self.logger {
            logger.log_package("->", &package);
        }
        self.codec.encode(self.role, &package).map_err(|e| {
            self.stats.send_failures += 1;
            e
        })
    }

    /// Push pending output without decoding
    pub fn flush(&mut self) -> ModbusResult<()> {
        self.codec.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecStats;
    use crate::protocol::{Count, Opcode};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Codec fed with ready-made packages, recording everything encoded
    #[derive(Default)]
    struct ScriptedCodec {
        incoming: VecDeque<ModbusResult<Package>>,
        sent: Arc<Mutex<Vec<Package>>>,
        flushes: usize,
    }

    impl Codec for ScriptedCodec {
        fn decode(&mut self, _role: Role) -> ModbusResult<Package> {
            self.incoming.pop_front().unwrap_or(Err(ModbusError::incomplete(1)))
        }

        fn encode(&mut self, _role: Role, package: &Package) -> ModbusResult<()> {
            self.sent.lock().unwrap().push(package.clone());
            Ok(())
        }

        fn flush(&mut self) -> ModbusResult<()> {
            self.flushes += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn stats(&self) -> CodecStats {
            CodecStats::default()
        }
    }

    fn slave_with(
        packages: Vec<Package>,
    ) -> (ModbusEngine<ScriptedCodec>, Arc<Mutex<Vec<Package>>>) {
        let codec = ScriptedCodec {
            incoming: packages.into_iter().map(Ok).collect(),
            ..Default::default()
        };
        let sent = codec.sent.clone();
        (ModbusEngine::slave(1, codec), sent)
    }

    fn read_registers(unit: SlaveId) -> Package {
        Package::request(unit, Request::read(ModbusFunction::ReadHoldingRegisters, 0, 2).unwrap())
    }

    #[test]
    fn test_idle_when_nothing_decoded() {
        let (mut engine, sent) = slave_with(vec![]);
        assert_eq!(engine.tick(), TickOutcome::Idle);
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(engine.codec().flushes, 0);
    }

    #[test]
    fn test_hook_receives_request_and_replies() {
        let (mut engine, sent) = slave_with(vec![read_registers(1)]);
        engine.on(ModbusFunction::ReadHoldingRegisters, |unit, message, responder| {
            assert_eq!(unit, 1);
            if let Message::Request(request) = message {
                let mut reply = Reply::for_request(request).unwrap();
                reply.set_words(&[7, 8]).unwrap();
                responder.reply(reply).unwrap();
            }
        });

        assert_eq!(engine.tick(), TickOutcome::Dispatched);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            PackageBody::Reply(reply) => assert_eq!(reply.payload.as_words(), &[7, 8]),
            PackageBody::Request(_) => panic!("expected a reply"),
        }
        assert_eq!(engine.codec().flushes, 1);
    }

    #[test]
    fn test_missing_hook_sends_illegal_function() {
        let (mut engine, sent) = slave_with(vec![read_registers(1)]);
        assert_eq!(engine.tick(), TickOutcome::ExceptionSent);

        let sent = sent.lock().unwrap();
        match &sent[0].body {
            PackageBody::Reply(reply) => {
                assert_eq!(reply.opcode, Opcode(0x83));
                assert_eq!(reply.exception_code(), Some(0x01));
            }
            PackageBody::Request(_) => panic!("expected a reply"),
        }
        assert_eq!(engine.stats().exceptions_sent, 1);
    }

    #[test]
    fn test_other_unit_is_forwarded_not_dispatched() {
        let (mut engine, sent) = slave_with(vec![read_registers(9)]);
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let seen = forwarded.clone();
        engine.on_forward(move |unit, request| seen.lock().unwrap().push((unit, request.count)));
        engine.on(ModbusFunction::ReadHoldingRegisters, |_, _, _| panic!("hook must not run"));

        assert_eq!(engine.tick(), TickOutcome::Forwarded);
        assert_eq!(*forwarded.lock().unwrap(), vec![(9, Count::Length(2))]);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_is_forwarded_and_never_answered() {
        let (mut engine, sent) = slave_with(vec![read_registers(BROADCAST_ADDRESS)]);
        let count = Arc::new(Mutex::new(0));
        let calls = count.clone();
        engine.on_forward(move |unit, _| {
            assert_eq!(unit, BROADCAST_ADDRESS);
            *calls.lock().unwrap() += 1;
        });

        assert_eq!(engine.tick(), TickOutcome::Forwarded);
        assert_eq!(*count.lock().unwrap(), 1);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broadcast_without_forward_hook_is_discarded() {
        let (mut engine, sent) = slave_with(vec![read_registers(BROADCAST_ADDRESS)]);
        assert_eq!(engine.tick(), TickOutcome::Forwarded);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_responder_skips_broadcast() {
        let codec = ScriptedCodec::default();
        let sent = codec.sent.clone();
        let mut engine = ModbusEngine::slave(1, codec);
        let reply = Reply::for_request(&Request::write_single_register(0, 1)).unwrap();
        engine.send_reply(BROADCAST_ADDRESS, reply, None).unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_exception_opcode_routes_to_masked_function_hook() {
        let reply = Reply::exception(
            &Request::read(ModbusFunction::ReadCoils, 0, 1).unwrap(),
            ModbusException::ServerDeviceBusy,
        );
        let codec = ScriptedCodec {
            incoming: vec![Ok(Package::reply(1, reply))].into(),
            ..Default::default()
        };
        let mut engine = ModbusEngine::master(codec);
        let codes = Arc::new(Mutex::new(Vec::new()));
        let seen = codes.clone();
        engine.on(ModbusFunction::ReadCoils, move |_, message, _| {
            if let Message::Reply(reply) = message {
                seen.lock().unwrap().push(reply.exception_code());
            }
        });

        assert_eq!(engine.tick(), TickOutcome::Dispatched);
        assert_eq!(*codes.lock().unwrap(), vec![Some(0x06)]);
    }

    #[test]
    fn test_master_drops_unhandled_reply() {
        let reply = Reply::for_request(&Request::write_single_coil(0, true)).unwrap();
        let codec = ScriptedCodec {
            incoming: vec![Ok(Package::reply(1, reply))].into(),
            ..Default::default()
        };
        let mut engine = ModbusEngine::master(codec);
        assert_eq!(engine.tick(), TickOutcome::Dropped);
        assert_eq!(engine.stats().dropped, 1);
    }

    #[test]
    fn test_rejected_input_is_counted() {
        let codec = ScriptedCodec {
            incoming: vec![Err(ModbusError::crc_mismatch(1, 2))].into(),
            ..Default::default()
        };
        let mut engine = ModbusEngine::slave(1, codec);
        assert_eq!(engine.tick(), TickOutcome::Rejected);
        assert_eq!(engine.stats().rejected, 1);
        assert_eq!(engine.stats().ticks, 1);
    }

    #[test]
    fn test_role_guards_on_host_sends() {
        let mut engine = ModbusEngine::slave(1, ScriptedCodec::default());
        let err = engine.send_request(1, Request::write_single_register(0, 1)).unwrap_err();
        assert!(matches!(err, ModbusError::Unsupported { .. }));

        let mut engine = ModbusEngine::master(ScriptedCodec::default());
        let reply = Reply::for_request(&Request::write_single_register(0, 1)).unwrap();
        assert!(engine.send_reply(1, reply, None).is_err());
    }

    #[test]
    fn test_replacing_and_removing_hooks() {
        let (mut engine, _sent) = slave_with(vec![read_registers(1)]);
        engine.on(ModbusFunction::ReadHoldingRegisters, |_, _, _| panic!("replaced"));
        engine.on(ModbusFunction::ReadHoldingRegisters, |_, _, _| {});
        assert_eq!(engine.tick(), TickOutcome::Dispatched);

        assert!(engine.remove_hook(ModbusFunction::ReadHoldingRegisters));
        assert!(!engine.remove_hook(ModbusFunction::ReadHoldingRegisters));
    }
}
