use iec60870::common::CauseOfTransmission;
use iec60870::iec101::{Master, MasterConfig, SerialLineParameters};
use iec60870::object::{InformationObject, IoBody, TypeId};
use iec60870::Asdu;
use std::error::Error;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Drives a CS101 primary-unbalanced master over a serial line: polls
/// one slave on demand, sends a single command to it, and prints
/// whatever the round-robin cycle picks up.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    const SLAVE_ADDRESS: u32 = 1;

    let config = MasterConfig {
        serial: SerialLineParameters {
            port_name: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            ..Default::default()
        },
        poll_interval: Duration::from_millis(300),
        ..MasterConfig::default().with_slave(SLAVE_ADDRESS)
    };
    let alp = config.alp;

    println!("opening {}", config.serial.port_name);
    let master = Master::connect(config).await?;

    master.poll_single_slave(SLAVE_ADDRESS)?;
    println!("is_channel_ready({SLAVE_ADDRESS}) = {}", master.is_channel_ready(SLAVE_ADDRESS).await);

    let mut command = Asdu::new(TypeId::CScNa1, false, CauseOfTransmission::Activation, false, false, None, SLAVE_ADDRESS);
    command.add_io(
        InformationObject { ioa: 11, body: IoBody::SingleCommand { value: true, qualifier: 0, select: false, time: None } },
        &alp,
    )?;
    master.send_asdu(SLAVE_ADDRESS, command)?;

    loop {
        tokio::select! {
            Some((address, asdu)) = master.receive() => {
                println!("slave {address}: {:?} ({} elements)", asdu.type_id, asdu.element_count());
            }
            Some((address, state)) = master.next_link_state_event() => {
                println!("slave {address} link state: {:?}", state);
            }
            else => break,
        }
    }

    Ok(())
}
