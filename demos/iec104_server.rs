use iec60870::common::{ApplicationLayerParameters, CauseOfTransmission};
use iec60870::iec104::{Server, ServerConfig};
use iec60870::object::{InformationObject, IoBody, TypeId};
use iec60870::Asdu;
use std::error::Error;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing_subscriber::EnvFilter;

/// Listens for CS104 connections, answers single commands and
/// interrogation requests, and periodically broadcasts measured values.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = ServerConfig::default();
    let alp = config.alp;
    println!("listening on {}", config.bind_address);
    let server = Arc::new(Server::bind(config).await?);

    let periodic = {
        let server = server.clone();
        tokio::spawn(async move {
            let mut counter: i16 = 0;
            loop {
                sleep(Duration::from_secs(5)).await;
                counter = counter.wrapping_add(1);
                if let Err(e) = send_measurement(&server, &alp, counter).await {
                    eprintln!("periodic send failed: {e}");
                    break;
                }
            }
        })
    };

    loop {
        tokio::select! {
            Some((peer, asdu)) = server.receive() => {
                println!("received from {peer}: {:?}", asdu.type_id);
                if let Err(e) = handle_asdu(&server, &alp, &asdu).await {
                    eprintln!("failed to handle ASDU from {peer}: {e}");
                }
            }
            Some((peer, event)) = server.next_event() => {
                println!("{peer}: {:?}", event);
            }
            else => break,
        }
    }

    periodic.abort();
    Ok(())
}

async fn handle_asdu(server: &Server, alp: &ApplicationLayerParameters, asdu: &Asdu) -> Result<(), Box<dyn Error>> {
    match asdu.type_id {
        TypeId::CScNa1 => {
            let confirmation = respond(alp, asdu, CauseOfTransmission::ActivationConfirmation)?;
            server.send_to_group("default", &confirmation, alp).await?;
            sleep(Duration::from_millis(200)).await;
            let termination = respond(alp, asdu, CauseOfTransmission::ActivationTermination)?;
            server.send_to_group("default", &termination, alp).await?;
        }
        TypeId::CIcNa1 => {
            let confirmation = respond(alp, asdu, CauseOfTransmission::ActivationConfirmation)?;
            server.send_to_group("default", &confirmation, alp).await?;
            send_all_points(server, alp).await?;
            let termination = respond(alp, asdu, CauseOfTransmission::ActivationTermination)?;
            server.send_to_group("default", &termination, alp).await?;
        }
        other => println!("unhandled command type {:?}", other),
    }
    Ok(())
}

fn respond(alp: &ApplicationLayerParameters, original: &Asdu, cause: CauseOfTransmission) -> Result<Asdu, Box<dyn Error>> {
    let mut asdu = Asdu::new(original.type_id, false, cause, false, false, None, original.common_address);
    for io in original.elements() {
        asdu.add_io(io.clone(), alp)?;
    }
    Ok(asdu)
}

async fn send_all_points(server: &Server, alp: &ApplicationLayerParameters) -> Result<(), Box<dyn Error>> {
    let mut points = Asdu::new(TypeId::MSpNa1, false, CauseOfTransmission::Spontaneous, false, false, None, 1);
    points.add_io(
        InformationObject { ioa: 1001, body: IoBody::SinglePoint { value: true, quality: Default::default(), time: None } },
        alp,
    )?;
    points.add_io(
        InformationObject { ioa: 1002, body: IoBody::SinglePoint { value: false, quality: Default::default(), time: None } },
        alp,
    )?;
    server.send_to_group("default", &points, alp).await?;
    Ok(())
}

async fn send_measurement(server: &Server, alp: &ApplicationLayerParameters, counter: i16) -> Result<(), Box<dyn Error>> {
    let mut measurement = Asdu::new(TypeId::MMeNb1, false, CauseOfTransmission::Periodic, false, false, None, 1);
    measurement.add_io(
        InformationObject { ioa: 2001, body: IoBody::MeasuredValueScaled { value: counter, quality: Default::default(), time: None } },
        alp,
    )?;
    server.send_to_group("default", &measurement, alp).await?;
    println!("broadcast measurement {counter}");
    Ok(())
}
