/// Modbus RTU Simulator
///
/// Wires a master engine and a slave engine back to back over an in-memory
/// link and walks through every supported function code. The slave is a
/// simulated power meter; it deliberately leaves Write Multiple Coils
/// unhandled so the automatic Illegal Function reply shows up, and a burst of
/// line noise is injected to show the decoder resynchronizing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use modbus_engine::transport::MemoryTransport;
use modbus_engine::{
    console_logger, Codec, Message, ModbusEngine, ModbusException, ModbusFunction, ModbusResult,
    Reply, Request, RtuCodec, TickOutcome,
};

const SLAVE_ID: u8 = 1;

/// Register banks of the simulated meter
#[derive(Default)]
struct MeterState {
    holding_registers: HashMap<u16, u16>,
    input_registers: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    discrete_inputs: HashMap<u16, bool>,
}

impl MeterState {
    fn new() -> Self {
        let mut state = Self::default();
        for i in 0..10u16 {
            // voltage in 0.1 V steps
            state.holding_registers.insert(i, 2200 + i * 5);
            // current in mA
            state.input_registers.insert(i, 10_000 + i * 100);
            state.coils.insert(i, i % 2 == 0);
            state.discrete_inputs.insert(i, i % 3 == 0);
        }
        state
    }

    fn handle(&mut self, request: &Request) -> ModbusResult<Reply> {
        let start = request.address;
        let quantity = request.count.raw();
        let mut reply = Reply::for_request(request)?;

        match request.function() {
            Some(ModbusFunction::ReadCoils) => {
                let bits = range(start, quantity)
                    .map(|a| self.coils.get(&a).copied().unwrap_or(false));
                reply.set_bits(&bits.collect::<Vec<_>>())?;
            }
            Some(ModbusFunction::ReadDiscreteInputs) => {
                let bits = range(start, quantity)
                    .map(|a| self.discrete_inputs.get(&a).copied().unwrap_or(false));
                reply.set_bits(&bits.collect::<Vec<_>>())?;
            }
            Some(ModbusFunction::ReadHoldingRegisters) => {
                let words = range(start, quantity)
                    .map(|a| self.holding_registers.get(&a).copied().unwrap_or(0));
                reply.set_words(&words.collect::<Vec<_>>())?;
            }
            Some(ModbusFunction::ReadInputRegisters) => {
                let words = range(start, quantity)
                    .map(|a| self.input_registers.get(&a).copied().unwrap_or(0));
                reply.set_words(&words.collect::<Vec<_>>())?;
            }
            Some(ModbusFunction::WriteSingleCoil) => {
                self.coils.insert(start, request.coil_value().unwrap_or(false));
            }
            Some(ModbusFunction::WriteSingleRegister) => {
                self.holding_registers.insert(start, quantity);
            }
            Some(ModbusFunction::WriteMultipleRegisters) => {
                for (address, value) in range(start, quantity).zip(request.payload.as_words()) {
                    self.holding_registers.insert(address, *value);
                }
            }
            _ => return Ok(Reply::exception(request, ModbusException::IllegalFunction)),
        }
        Ok(reply)
    }
}

fn range(start: u16, quantity: u16) -> impl Iterator<Item = u16> {
    (0..quantity).map(move |offset| start.wrapping_add(offset))
}

/// Tick an engine until it runs out of input
fn drain<C: Codec>(engine: &mut ModbusEngine<C>) -> Vec<TickOutcome> {
    let mut outcomes = Vec::new();
    loop {
        match engine.tick() {
            TickOutcome::Idle => return outcomes,
            outcome => outcomes.push(outcome),
        }
    }
}

fn main() -> ModbusResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let _ = tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish());

    println!("🔌 Modbus RTU Simulator");
    println!("=======================");

    let (master_link, slave_link) = MemoryTransport::pair();
    let line = slave_link.clone();

    // slave: every function except Write Multiple Coils
    let meter = Arc::new(Mutex::new(MeterState::new()));
    let mut slave_codec = RtuCodec::new(slave_link);
    slave_codec.set_packet_logging(true);
    let mut slave = ModbusEngine::slave(SLAVE_ID, slave_codec).with_logger(console_logger!());
    for function in ModbusFunction::ALL {
        if function == ModbusFunction::WriteMultipleCoils {
            continue;
        }
        let meter = meter.clone();
        slave.on(function, move |_unit, message, responder| {
            if let Message::Request(request) = message {
                let reply = match meter.lock() {
                    Ok(mut meter) => meter.handle(request).unwrap_or_else(|e| {
                        warn!("Request {} not served: {}", request, e);
                        Reply::exception(request, ModbusException::IllegalDataValue)
                    }),
                    Err(_) => Reply::exception(request, ModbusException::ServerDeviceFailure),
                };
                if let Err(e) = responder.reply(reply) {
                    warn!("Reply failed: {}", e);
                }
            }
        });
    }
    slave.on_forward(|unit, request| info!("📨 Forwarded for unit {}: {}", unit, request));

    // master: record every reply
    let replies: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));
    let mut master = ModbusEngine::master(RtuCodec::new(master_link));
    for function in ModbusFunction::ALL {
        let replies = replies.clone();
        master.on(function, move |unit, message, _responder| {
            if let Message::Reply(reply) = message {
                match reply.check() {
                    Ok(()) => info!("✅ unit {} {}", unit, reply),
                    Err(e) => info!("⚠️  unit {} {}", unit, e),
                }
                if let Ok(mut replies) = replies.lock() {
                    replies.push(reply.clone());
                }
            }
        });
    }

    let requests = vec![
        Request::read(ModbusFunction::ReadCoils, 0, 8)?,
        Request::read(ModbusFunction::ReadDiscreteInputs, 0, 8)?,
        Request::read(ModbusFunction::ReadHoldingRegisters, 0, 4)?,
        Request::read(ModbusFunction::ReadInputRegisters, 0, 4)?,
        Request::write_single_coil(1, true),
        Request::write_single_register(2, 0x1234),
        Request::write_multiple_registers(4, &[0xAAAA, 0xBBBB, 0xCCCC])?,
        Request::write_multiple_coils(0, &[true, false, true])?,
        Request::read(ModbusFunction::ReadHoldingRegisters, 0, 8)?,
    ];

    for (step, request) in requests.into_iter().enumerate() {
        println!("\n📋 Step {}: {}", step + 1, request);
        if step == 2 {
            // line noise ahead of the next frame
            line.inject(&[0xFF, 0x00, 0x42]);
        }
        master.send_request(SLAVE_ID, request)?;
        master.flush()?;

        let slave_outcomes = drain(&mut slave);
        let master_outcomes = drain(&mut master);
        info!("slave: {:?}, master: {:?}", slave_outcomes, master_outcomes);
    }

    println!("\n📡 Broadcast write (no reply expected)");
    master.send_request(0, Request::write_single_register(0, 0))?;
    master.flush()?;
    info!("slave: {:?}, master: {:?}", drain(&mut slave), drain(&mut master));

    let replies = replies.lock().map(|r| r.len()).unwrap_or(0);
    println!("\n📊 Results");
    println!("   Replies received: {}", replies);
    println!("   Slave engine:  {:?}", slave.stats());
    println!("   Slave codec:   {:?}", slave.codec().stats());
    println!("   Master engine: {:?}", master.stats());
    Ok(())
}
