use std::sync::Arc;
use std::time::Duration;

use switchyard_channels::{
    BackendSettings, Channel, ChannelLayers, ChannelLayersConfig, Consumer, ConsumerCatalog,
    ConsumerContext, ConsumerError, Group, Message, Worker, WorkerConfigBuilder, DEFAULT_ALIAS,
};
use tokio_util::sync::CancellationToken;

fn catalog() -> ConsumerCatalog {
    let upper: Arc<dyn Consumer> = Arc::new(|message: Message, ctx: ConsumerContext| async move {
        let text = message.get_str("text").unwrap_or_default().to_uppercase();
        let reply = message.get_str("reply_channel").unwrap_or_default().to_string();
        ctx.channel(reply).send(Message::new().with("text", text)).await?;
        Ok::<(), ConsumerError>(())
    });
    let broadcast: Arc<dyn Consumer> = Arc::new(|message: Message, ctx: ConsumerContext| async move {
        ctx.group("room").send(message).await?;
        Ok::<(), ConsumerError>(())
    });

    let mut catalog = ConsumerCatalog::new();
    catalog.insert("upper".to_string(), upper);
    catalog.insert("broadcast".to_string(), broadcast);
    catalog
}

async fn layers() -> ChannelLayers {
    let config = ChannelLayersConfig::default().with_backend(
        DEFAULT_ALIAS,
        BackendSettings::memory()
            .route("text.upper", "upper")
            .route("room.say", "broadcast"),
    );
    ChannelLayers::build(config, &catalog()).await.unwrap()
}

async fn wait_for(channel: &Channel, within: Duration) -> Option<Message> {
    let names = vec![channel.name().to_string()];
    tokio::time::timeout(within, async {
        loop {
            if let Some((_, message)) = channel.backend().receive_many(&names, true).await.unwrap() {
                return message;
            }
        }
    })
    .await
    .ok()
}

#[tokio::test]
async fn worker_answers_on_reply_channel() {
    let layers = layers().await;
    let backend = layers.default_backend().unwrap();

    let shutdown = CancellationToken::new();
    let handle = Worker::new(
        backend.clone(),
        WorkerConfigBuilder::testing().build().expect("Failed to build config"),
    )
    .spawn(shutdown.clone());

    let reply = Channel::new(Channel::new_name("text.reply"), backend.clone());
    Channel::new("text.upper", backend.clone())
        .send(
            Message::new()
                .with("text", "hello")
                .with("reply_channel", reply.name()),
        )
        .await
        .unwrap();

    let answer = wait_for(&reply, Duration::from_secs(2))
        .await
        .expect("no reply");
    assert_eq!(answer.get_str("text"), Some("HELLO"));

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn worker_fans_out_to_group() {
    let layers = layers().await;
    let backend = layers.default_backend().unwrap();

    let room = Group::new("room", backend.clone());
    let alice = Channel::new(Channel::new_name("member"), backend.clone());
    let bob = Channel::new(Channel::new_name("member"), backend.clone());
    room.add(alice.name()).await.unwrap();
    room.add(bob.name()).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = Worker::new(
        backend.clone(),
        WorkerConfigBuilder::testing().build().expect("Failed to build config"),
    )
    .spawn(shutdown.clone());

    Channel::new("room.say", backend.clone())
        .send(Message::new().with("text", "hi all"))
        .await
        .unwrap();

    for member in [&alice, &bob] {
        let message = wait_for(member, Duration::from_secs(2))
            .await
            .expect("member missed the broadcast");
        assert_eq!(message.get_str("text"), Some("hi all"));
    }

    shutdown.cancel();
    handle.await.unwrap();
}
