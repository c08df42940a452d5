//! Listener tests over real sockets on OS-assigned ports.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;
    use std::time::Duration;

    use edgegate_transport::{
        Connection, MAX_FRAME_LEN, Transport, TransportError, WebSocketConnection,
        WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::{self, Message};

    type Device = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Accepted server side plus the device side of one upgrade.
    async fn pair_with(
        request: tungstenite::handshake::client::Request,
        mut transport: WebSocketTransport,
    ) -> (WebSocketConnection, Device, tungstenite::handshake::client::Response) {
        let server = tokio::spawn(async move { transport.accept().await.unwrap() });
        let (device, response) = tokio_tungstenite::connect_async(request).await.unwrap();
        (server.await.unwrap(), device, response)
    }

    async fn pair() -> (WebSocketConnection, Device) {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        let request = format!("ws://{addr}").into_client_request().unwrap();
        let (conn, device, _) = pair_with(request, transport).await;
        (conn, device)
    }

    #[tokio::test]
    async fn test_websocket_frames_cross_both_ways() {
        let (conn, mut device) = pair().await;
        assert!(conn.id().into_inner() > 0);

        conn.send(b"connack").await.unwrap();
        let frame = device.next().await.unwrap().unwrap();
        assert_eq!(frame.into_data().as_ref(), b"connack");

        device
            .send(Message::Binary(b"publish".to_vec().into()))
            .await
            .unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap(), b"publish");

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_websocket_text_frame_is_accepted() {
        let (conn, mut device) = pair().await;
        device.send(Message::Text(String::from(r#"{"type":"Ping"}"#).into())).await.unwrap();
        assert_eq!(conn.recv().await.unwrap().unwrap(), br#"{"type":"Ping"}"#);
    }

    #[tokio::test]
    async fn test_websocket_mqtt_subprotocol_is_echoed() {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();
        let mut request = format!("ws://{addr}").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", "mqtt".parse().unwrap());

        let (_conn, _device, response) = pair_with(request, transport).await;

        assert_eq!(
            response.headers().get("sec-websocket-protocol").unwrap(),
            "mqtt"
        );
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_is_pending() {
        let (conn, mut device) = pair().await;
        let conn = Arc::new(conn);
        let reader = Arc::clone(&conn);
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;

        tokio::time::timeout(Duration::from_secs(2), conn.send(b"deliver"))
            .await
            .expect("send must not wait for recv")
            .unwrap();
        let frame = device.next().await.unwrap().unwrap();
        assert_eq!(frame.into_data().as_ref(), b"deliver");

        device.send(Message::Close(None)).await.unwrap();
        assert!(pending.await.unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_device_close() {
        let (conn, mut device) = pair().await;
        device.send(Message::Close(None)).await.unwrap();
        assert!(conn.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_websocket_oversized_frame_is_rejected() {
        let (conn, mut device) = pair().await;
        device
            .send(Message::Binary(vec![0u8; MAX_FRAME_LEN + 1].into()))
            .await
            .unwrap();
        let result = conn.recv().await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }
}

#[cfg(feature = "tcp")]
mod tcp {
    use edgegate_transport::{
        Connection, MAX_FRAME_LEN, TcpTransport, Transport, TransportError,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn pair() -> (edgegate_transport::TcpConnection, TcpStream) {
        let mut transport = TcpTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().unwrap();
        let server_handle =
            tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = TcpStream::connect(addr).await.expect("should connect");
        (server_handle.await.unwrap(), client)
    }

    #[tokio::test]
    async fn test_tcp_frames_round_trip() {
        let (conn, mut client) = pair().await;

        client.write_u32(5).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let frame = conn.recv().await.unwrap().expect("frame");
        assert_eq!(frame, b"hello");

        conn.send(b"world!").await.unwrap();
        let len = client.read_u32().await.unwrap();
        assert_eq!(len, 6);
        let mut buf = vec![0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"world!");
    }

    #[tokio::test]
    async fn test_tcp_clean_close_returns_none() {
        let (conn, client) = pair().await;
        drop(client);
        let result = conn.recv().await.expect("clean close is not an error");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_tcp_truncated_frame_is_receive_error() {
        let (conn, mut client) = pair().await;
        client.write_u32(10).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        let result = conn.recv().await;
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));
    }

    #[tokio::test]
    async fn test_tcp_oversized_frame_is_rejected() {
        let (conn, mut client) = pair().await;
        client.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();
        let result = conn.recv().await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }
}
