//! Integration tests for the stacking combinator.
//!
//! Each test drives a socket stack from both ends: items are sent from the
//! top socket and collected from the bottom wire, and the other way round.
//! The bottom of every stack is a bare [`Socket::pair`], so the test itself
//! plays the transport.

use std::time::Duration;

use linkstack::layer::{map, Effects, Layer, LayerError, Stacked};
use linkstack::socket::{stack, Socket, Wire};

/// Appends `label` on the way down and prefixes it on the way up.
fn tagged(label: &'static str) -> impl Layer<String> + Send + 'static {
    map(
        move |s: String| Some(format!("{s}>{label}")),
        move |s: String| Some(format!("{label}<{s}")),
    )
}

/// Numbers every item per direction; drops upward items marked `noise`.
#[derive(Default)]
struct Numbering {
    down: u32,
    up: u32,
}

impl Layer<String> for Numbering {
    fn handle_down(&mut self, item: String, fx: &mut Effects<String>) -> Result<(), LayerError> {
        self.down += 1;
        fx.push_down(format!("{}#{item}", self.down));
        Ok(())
    }

    fn handle_up(&mut self, item: String, fx: &mut Effects<String>) -> Result<(), LayerError> {
        if item.contains("noise") {
            return Ok(());
        }
        self.up += 1;
        fx.push_up(format!("{item}#{}", self.up));
        Ok(())
    }
}

/// Splits downward items on `,` into several items.
fn splitter() -> impl Layer<String> + Send + 'static {
    struct Split;
    impl Layer<String> for Split {
        fn handle_down(
            &mut self,
            item: String,
            fx: &mut Effects<String>,
        ) -> Result<(), LayerError> {
            for part in item.split(',') {
                fx.push_down(part.to_string());
            }
            Ok(())
        }

        fn handle_up(&mut self, item: String, fx: &mut Effects<String>) -> Result<(), LayerError> {
            fx.push_up(item);
            Ok(())
        }
    }
    Split
}

async fn next<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed")
}

/// Push `down` from the top and `up` from the bottom, and record what comes
/// out at the other end.  `expect_down` / `expect_up` are the output counts.
async fn exercise(
    mut top: Socket<String>,
    mut wire: Wire<String>,
    down: &[&str],
    up: &[&str],
    expect_down: usize,
    expect_up: usize,
) -> (Vec<String>, Vec<String>) {
    for item in down {
        top.send(item.to_string()).unwrap();
    }
    let mut out_down = Vec::new();
    for _ in 0..expect_down {
        out_down.push(next(&mut wire.down).await);
    }

    for item in up {
        wire.up.send(item.to_string()).unwrap();
    }
    let mut out_up = Vec::new();
    for _ in 0..expect_up {
        let item = tokio::time::timeout(Duration::from_secs(5), top.recv())
            .await
            .expect("timed out")
            .expect("socket closed");
        out_up.push(item);
    }
    (out_down, out_up)
}

#[tokio::test]
async fn nested_stacks_match_composed_layer() {
    let down = ["a", "b,c", "d"];
    let up = ["x", "noise", "y"];

    let (bottom, wire) = Socket::pair();
    let nested = bottom
        .stack(splitter())
        .stack(Numbering::default())
        .stack(tagged("top"));
    let nested = exercise(nested, wire, &down, &up, 4, 2).await;

    let (bottom, wire) = Socket::pair();
    let composed = bottom.stack(Stacked::new(
        splitter(),
        Stacked::new(Numbering::default(), tagged("top")),
    ));
    let composed = exercise(composed, wire, &down, &up, 4, 2).await;

    assert_eq!(nested, composed);
    assert_eq!(nested.0, vec!["1#a>top", "2#b", "c>top", "3#d>top"]);
    assert_eq!(nested.1, vec!["top<x#1", "top<y#2"]);
}

#[tokio::test]
async fn composition_order_is_associative() {
    let down = ["m1", "m2"];
    let up = ["r1", "r2"];

    // (A ∘ B) ∘ C
    let (bottom, wire) = Socket::pair();
    let left = bottom.stack(Stacked::new(
        Stacked::new(tagged("a"), tagged("b")),
        tagged("c"),
    ));
    let left = exercise(left, wire, &down, &up, 2, 2).await;

    // A ∘ (B ∘ C)
    let (bottom, wire) = Socket::pair();
    let right = bottom.stack(Stacked::new(
        tagged("a"),
        Stacked::new(tagged("b"), tagged("c")),
    ));
    let right = exercise(right, wire, &down, &up, 2, 2).await;

    // stack(stack(stack(socket, A), B), C)
    let (bottom, wire) = Socket::pair();
    let free = stack(stack(stack(bottom, tagged("a")), tagged("b")), tagged("c"));
    let free = exercise(free, wire, &down, &up, 2, 2).await;

    assert_eq!(left, right);
    assert_eq!(left, free);
    assert_eq!(left.0, vec!["m1>c>b>a", "m2>c>b>a"]);
    assert_eq!(left.1, vec!["c<b<a<r1", "c<b<a<r2"]);
}

#[tokio::test]
async fn dropping_the_top_shuts_the_stack_down() {
    let (bottom, mut wire) = Socket::<String>::pair();
    let top = bottom.stack(tagged("a")).stack(tagged("b"));
    drop(top);

    // Each event loop notices on its next wake-up and drops the socket below.
    let closed = tokio::time::timeout(Duration::from_secs(5), wire.down.recv())
        .await
        .expect("stack kept running");
    assert_eq!(closed, None);
}
