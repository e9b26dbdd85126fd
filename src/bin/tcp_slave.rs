/// Modbus Engine TCP Slave
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Serves an in-memory coil/register table over Modbus TCP (or RTU, when the
/// configuration selects a serial port). Each client gets its own engine,
/// ticked on a tokio interval.
///
/// Usage: `tcp_slave [config.yaml|config.json]`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::time::interval;

use modbus_engine::utils::validation::validate_address_range;
use modbus_engine::{
    Codec, EngineConfig, Message, ModbusEngine, ModbusException, ModbusFunction, ModbusResult,
    Reply, Request, SocketCodec, TcpTransport, TickOutcome, TransportConfig,
};

const TABLE_SIZE: usize = 1000;

/// Coils, discrete inputs, holding and input registers
struct DataTables {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

type SharedTables = Arc<Mutex<DataTables>>;

impl DataTables {
    fn new() -> Self {
        let mut tables = Self {
            coils: vec![false; TABLE_SIZE],
            discrete_inputs: vec![false; TABLE_SIZE],
            holding_registers: vec![0; TABLE_SIZE],
            input_registers: vec![0; TABLE_SIZE],
        };
        for i in 0..50 {
            tables.holding_registers[i] = 0x1000 + i as u16;
            tables.input_registers[i] = 0x2000 + i as u16;
            tables.coils[i] = i % 3 == 0;
            tables.discrete_inputs[i] = i % 2 == 0;
        }
        tables
    }

    /// Answer one request, or an exception reply
    fn serve(&mut self, request: &Request) -> Reply {
        match self.apply(request) {
            Ok(reply) => reply,
            Err(code) => Reply::exception(request, code),
        }
    }

    fn apply(&mut self, request: &Request) -> Result<Reply, ModbusException> {
        let function = request.function().ok_or(ModbusException::IllegalFunction)?;
        let start = request.address as usize;
        let quantity = match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            _ => request.count.raw(),
        };
        check_range(request.address, quantity)?;
        let range = start..start + quantity as usize;

        let mut reply =
            Reply::for_request(request).map_err(|_| ModbusException::IllegalDataValue)?;
        let filled = match function {
            ModbusFunction::ReadCoils => reply.set_bits(&self.coils[range]),
            ModbusFunction::ReadDiscreteInputs => reply.set_bits(&self.discrete_inputs[range]),
            ModbusFunction::ReadHoldingRegisters => {
                reply.set_words(&self.holding_registers[range])
            }
            ModbusFunction::ReadInputRegisters => reply.set_words(&self.input_registers[range]),
            ModbusFunction::WriteSingleCoil => {
                self.coils[start] = request.coil_value().unwrap_or(false);
                Ok(())
            }
            ModbusFunction::WriteSingleRegister => {
                self.holding_registers[start] = request.count.raw();
                Ok(())
            }
            ModbusFunction::WriteMultipleCoils => {
                let values = request.payload.to_bools(quantity as usize);
                self.coils[range].copy_from_slice(&values);
                Ok(())
            }
            ModbusFunction::WriteMultipleRegisters => {
                let words = request.payload.as_words();
                if words.len() < quantity as usize {
                    return Err(ModbusException::IllegalDataValue);
                }
                self.holding_registers[range].copy_from_slice(&words[..quantity as usize]);
                Ok(())
            }
        };
        filled.map_err(|_| ModbusException::ServerDeviceFailure)?;
        Ok(reply)
    }
}

fn check_range(start: u16, quantity: u16) -> Result<(), ModbusException> {
    validate_address_range(start, quantity).map_err(|_| ModbusException::IllegalDataValue)?;
    if start as usize + quantity as usize > TABLE_SIZE {
        return Err(ModbusException::IllegalDataAddress);
    }
    Ok(())
}

/// Build a slave engine answering every function from `tables`
fn slave_engine<C: Codec>(unit: u8, codec: C, tables: &SharedTables) -> ModbusEngine<C> {
    let mut engine = ModbusEngine::slave(unit, codec);
    for function in ModbusFunction::ALL {
        let tables = tables.clone();
        engine.on(function, move |_unit, message, responder| {
            if let Message::Request(request) = message {
                let reply = match tables.lock() {
                    Ok(mut tables) => tables.serve(request),
                    Err(_) => Reply::exception(request, ModbusException::ServerDeviceFailure),
                };
                if let Err(e) = responder.reply(reply) {
                    warn!("Reply to unit {} failed: {}", responder.unit(), e);
                }
            }
        });
    }
    engine.on_forward(|unit, request| {
        info!("📨 Not for us: unit {} {}", unit, request);
    });
    engine
}

async fn run_tcp(config: EngineConfig, tables: SharedTables) -> ModbusResult<()> {
    let bind_address = config.bind_address()?;
    let scratch_capacity = match config.transport {
        TransportConfig::Tcp { scratch_capacity, .. } => scratch_capacity,
        TransportConfig::Rtu { .. } => modbus_engine::MAX_TCP_FRAME_SIZE,
    };
    let listener = TcpListener::bind(bind_address).await?;
    info!("📍 Listening on: {}", bind_address);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("🔗 Client connected: {}", peer);

        let transport = TcpTransport::from_stream(stream)?;
        let mut codec = SocketCodec::with_capacity(transport, scratch_capacity);
        codec.set_packet_logging(config.packet_logging);
        let mut engine = slave_engine(config.unit_address, codec, &tables);
        let period = Duration::from_millis(config.tick_interval_ms);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                // drain everything that arrived since the last period
                while !matches!(engine.tick(), TickOutcome::Idle | TickOutcome::Rejected) {}
                if !engine.codec().is_connected() {
                    break;
                }
            }
            info!("🔌 Client {} disconnected, stats: {:?}", peer, engine.stats());
        });
    }
}

async fn run_rtu(config: EngineConfig, tables: SharedTables) -> ModbusResult<()> {
    let codec = config.open_rtu()?;
    info!("📍 Serving RTU on {}", codec.transport().port_name());
    let mut engine = slave_engine(config.unit_address, codec, &tables);

    let mut ticker = interval(Duration::from_millis(config.tick_interval_ms));
    loop {
        ticker.tick().await;
        while engine.tick() != TickOutcome::Idle {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let _ = tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish());

    println!("🚀 {}", modbus_engine::info());
    println!("=============================");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => {
            let mut config = EngineConfig::default();
            if let TransportConfig::Tcp { bind_address, .. } = &mut config.transport {
                *bind_address = "127.0.0.1:5020".to_string();
            }
            config
        }
    };
    config.validate()?;
    info!("🔧 Unit address {}, tick every {} ms", config.unit_address, config.tick_interval_ms);

    let tables: SharedTables = Arc::new(Mutex::new(DataTables::new()));

    let result = tokio::select! {
        result = async {
            match config.transport {
                TransportConfig::Tcp { .. } => run_tcp(config, tables).await,
                TransportConfig::Rtu { .. } => run_rtu(config, tables).await,
            }
        } => result,
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutting down");
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("❌ Slave stopped: {}", e);
    }
    result.context("slave stopped")
}
