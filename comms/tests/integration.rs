use std::borrow::Cow;

use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn tensor_crosses_the_channel() {
    const SIZE: usize = 128;

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut sender) = comms::channel(rx, tx);

    let (rx, tx) = io::split(two);
    let (mut receiver, _) = comms::channel(rx, tx);

    let sent: Vec<f32> = (0..100).map(|i| i as f32 * 0.5).collect();

    let send = async { sender.send(&Msg::Data(Payload::Tensor(&sent))).await };
    let recv = async {
        let mut buf: Vec<f32> = Vec::new();
        let msg: Msg = receiver.recv_into(&mut buf).await?;
        match msg {
            Msg::Data(Payload::Tensor(nums)) => Ok(nums.to_vec()),
            other => panic!("unexpected msg: {other:?}"),
        }
    };

    let (send_result, recv_result): (std::io::Result<()>, std::io::Result<Vec<f32>>) =
        tokio::join!(send, recv);

    send_result.unwrap();
    assert_eq!(recv_result.unwrap(), sent);
}

#[tokio::test]
async fn control_and_err_keep_order() {
    let (one, two) = io::duplex(1024);
    let (rx, tx) = io::split(one);
    let (_, mut sender) = comms::channel(rx, tx);

    let (rx, tx) = io::split(two);
    let (mut receiver, _) = comms::channel(rx, tx);

    sender.send(&Msg::Control(Command::Barrier)).await.unwrap();
    sender.send(&Msg::Err(Cow::Borrowed("boom"))).await.unwrap();

    let mut buf: Vec<u32> = Vec::new();
    {
        let first: Msg = receiver.recv_into(&mut buf).await.unwrap();
        assert!(matches!(first, Msg::Control(Command::Barrier)));
    }

    let second: Msg = receiver.recv_into(&mut buf).await.unwrap();
    match second {
        Msg::Err(detail) => assert_eq!(detail, "boom"),
        other => panic!("unexpected msg: {other:?}"),
    }
}
