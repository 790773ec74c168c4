use iec60870::common::{ApplicationLayerParameters, CauseOfTransmission};
use iec60870::iec104::{Client, ClientConfig};
use iec60870::object::{InformationObject, IoBody, TypeId};
use iec60870::Asdu;
use std::error::Error;
use tracing_subscriber::EnvFilter;

/// Connects to an IEC 60870-5-104 server, starts data transfer, sends
/// a single command, and prints whatever comes back.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = ClientConfig::default().with_address("127.0.0.1", 2404);
    let alp = config.alp;

    println!("connecting to {}:{}...", config.host, config.port);
    let client = Client::connect(config).await?;
    println!("connected, starting data transfer");
    client.start_dt().await?;

    let command = single_command(&alp, 1001, true)?;
    client.send_asdu(command).await?;
    println!("sent single command");

    while let Some(asdu) = client.receive().await? {
        print_asdu(&asdu);
    }

    println!("connection closed");
    Ok(())
}

fn single_command(alp: &ApplicationLayerParameters, ioa: u32, value: bool) -> Result<Asdu, Box<dyn Error>> {
    let mut asdu = Asdu::new(TypeId::CScNa1, false, CauseOfTransmission::Activation, false, false, None, 1);
    asdu.add_io(
        InformationObject {
            ioa,
            body: IoBody::SingleCommand { value, qualifier: 0, select: false, time: None },
        },
        alp,
    )?;
    Ok(asdu)
}

fn print_asdu(asdu: &Asdu) {
    match asdu.type_id {
        TypeId::MSpNa1 => {
            for io in asdu.elements() {
                if let IoBody::SinglePoint { value, quality, .. } = &io.body {
                    println!("single point {}: {} (quality {:?})", io.ioa, value, quality);
                }
            }
        }
        TypeId::MMeNb1 => {
            for io in asdu.elements() {
                if let IoBody::MeasuredValueScaled { value, .. } = &io.body {
                    println!("measured value {}: {}", io.ioa, value);
                }
            }
        }
        TypeId::CScNa1 => match asdu.cause {
            CauseOfTransmission::ActivationConfirmation => println!("command confirmed"),
            CauseOfTransmission::ActivationTermination => println!("command execution complete"),
            other => println!("single command response, cause {other}"),
        },
        other => println!("received type {:?} ({} elements)", other, asdu.element_count()),
    }
}
