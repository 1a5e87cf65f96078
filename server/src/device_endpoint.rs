use std::net::SocketAddr;

use tokio::{io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt}, net::TcpListener};
use trip_detection_lib::comms::{DeviceFrame, MAX_FRAME_BODY};

use crate::device_hub::DeviceHub;

pub async fn listen(addr: SocketAddr, hub: DeviceHub) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Device endpoint listening on {}", addr);
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            tracing::error!("Failed to accept connection");
            continue;
        };

        tracing::info!("New device connection from {}", peer);

        if hub.is_connected().await {
            // One tracker at a time feeds the engine.
            tracing::warn!("Refusing {}, a device is already connected", peer);
            continue;
        }

        let hub = hub.clone();
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            let res = handle_connection(reader, writer, hub).await;
            tracing::info!("Connection from {} ended with result: {:?}", peer, res);
        });
    }
}

/// Reads frames until the device hangs up, while a writer task relays commands back.
pub async fn handle_connection<R, W>(mut reader: R, mut writer: W, hub: DeviceHub) -> Result<(), anyhow::Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (lease, mut commands) = hub.attach().await;
    let command_task = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if writer.write_all(&[command]).await.is_err() {
                tracing::error!("Failed to send command {} to device", command);
                break;
            }
        }
    });

    let result = read_frames(&mut reader, &hub).await;
    command_task.abort();
    hub.detach(lease).await;
    result
}

async fn read_frames<R: AsyncRead + Unpin>(reader: &mut R, hub: &DeviceHub) -> Result<(), anyhow::Error> {
    let mut header = [0; 1];
    let mut length = [0; 2];
    let mut body = [0; MAX_FRAME_BODY];
    let mut frames: u64 = 0;

    loop {
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }

        reader.read_exact(&mut length).await?;
        let body_len = u16::from_be_bytes(length) as usize;
        if body_len > MAX_FRAME_BODY {
            return Err(anyhow::anyhow!("Frame of {} bytes exceeds the limit", body_len));
        }
        reader.read_exact(&mut body[..body_len]).await?;

        match DeviceFrame::decode(header[0], &body[..body_len]) {
            Ok(frame) => hub.dispatch(frame).await,
            Err(err) => {
                // Skip it, the length prefix keeps the stream aligned.
                tracing::warn!("Dropping frame: {}", err);
                continue;
            }
        }

        frames += 1;
        if frames % 1000 == 0 {
            tracing::debug!("Received {} frames", frames);
        }
    }

    tracing::info!("Device disconnected after {} frames", frames);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::io::duplex;
    use trip_detection_engine::{MotionSettings, MotionSource};
    use trip_detection_lib::AccelReading;

    use super::*;
    use crate::device_hub::RemoteMotionSource;

    #[tokio::test]
    async fn frames_are_decoded_and_garbage_is_skipped() {
        let hub = DeviceHub::new();
        let mut motion = RemoteMotionSource::new(hub.clone());
        let mut readings = motion.subscribe(MotionSettings { sample_interval: std::time::Duration::from_millis(200) }).await.unwrap();

        let (mut device, host) = duplex(1024);
        let (host_reader, host_writer) = tokio::io::split(host);
        let connection = tokio::spawn(handle_connection(host_reader, host_writer, hub.clone()));

        let reading = AccelReading::new(0.0, 0.0, 10.5, Utc::now());
        device.write_all(&[9, 0, 2, 0xAA, 0xBB]).await.unwrap();
        device.write_all(&DeviceFrame::Accel(reading).encode().unwrap()).await.unwrap();

        assert_eq!(readings.recv().await, Some(Ok(reading)));

        assert!(hub.is_connected().await);
        drop(device);
        assert!(connection.await.unwrap().is_ok());
        assert!(!hub.is_connected().await);
    }

    #[tokio::test]
    async fn oversized_frames_end_the_connection() {
        let hub = DeviceHub::new();
        let (mut device, host) = duplex(1024);
        let (host_reader, host_writer) = tokio::io::split(host);
        let connection = tokio::spawn(handle_connection(host_reader, host_writer, hub));

        device.write_all(&[1, 0xFF, 0xFF]).await.unwrap();
        assert!(connection.await.unwrap().is_err());
    }
}
