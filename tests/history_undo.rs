use mural::{BlendMode, FillOp, History, Layout, Point, Region, SetIndexesOp, SetOp, pack};

fn single_layer_layout(w: u32, h: u32) -> Layout {
    let mut layout = Layout::new(w, h).unwrap();
    layout.insert_layer(None).unwrap();
    layout.set_active_to(0).unwrap();
    layout
}

fn overwrite(color: u32, region: Option<Region>) -> SetOp {
    SetOp {
        color,
        region,
        blend: BlendMode::Overwrite,
        notify: false,
    }
}

#[test]
fn k_edits_k_undos_restore_and_k_redos_reapply() {
    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();

    let pristine = layout.image_data(None);
    let mut snapshots = Vec::new();
    for (i, region) in [
        Region::of(0, 0, 2, 2),
        Region::of(1, 1, 3, 3),
        Region::of(3, 0, 1, 4),
    ]
    .into_iter()
    .enumerate()
    {
        layout
            .set(
                &mut history,
                overwrite(pack(i as u8 + 1, 0, 0, 255), Some(region)),
            )
            .unwrap();
        snapshots.push(layout.image_data(None));
    }

    for _ in 0..3 {
        assert!(layout.undo(&mut history).unwrap());
    }
    assert_eq!(layout.image_data(None), pristine);
    assert!(!layout.undo(&mut history).unwrap());

    for snapshot in &snapshots {
        assert!(layout.redo(&mut history).unwrap());
        assert_eq!(&layout.image_data(None), snapshot);
    }
    assert!(!layout.redo(&mut history).unwrap());
}

#[test]
fn static_session_swap_is_symmetric() {
    // The 2x2 scenario: white everywhere, overwritten by (0,1,2,3), then
    // toggled back and forth by undo/redo.
    let mut layout = single_layer_layout(2, 2);
    let mut history = History::new();
    let white = pack(255, 255, 255, 255);
    let odd = pack(0, 1, 2, 3);

    layout.set(&mut history, overwrite(white, None)).unwrap();
    layout.set(&mut history, overwrite(odd, None)).unwrap();
    assert!(layout.image_data(None).iter().all(|&c| c == odd));

    layout.undo(&mut history).unwrap();
    assert!(layout.image_data(None).iter().all(|&c| c == white));

    layout.redo(&mut history).unwrap();
    assert!(layout.image_data(None).iter().all(|&c| c == odd));

    layout.undo(&mut history).unwrap();
    assert!(layout.image_data(None).iter().all(|&c| c == white));
}

#[test]
fn capacity_overflow_forgets_the_oldest_edit() {
    let mut layout = single_layer_layout(2, 2);
    let mut history = History::with_capacity(3);

    for i in 1..=4u8 {
        layout
            .set(&mut history, overwrite(pack(i, 0, 0, 255), None))
            .unwrap();
    }

    let mut undone = 0;
    while layout.undo(&mut history).unwrap() {
        undone += 1;
    }
    assert_eq!(undone, 3);
    // The first edit was evicted, so unwinding lands on its result rather
    // than on the pristine canvas.
    assert!(
        layout
            .image_data(None)
            .iter()
            .all(|&c| c == pack(1, 0, 0, 255))
    );
}

#[test]
fn new_edit_after_undo_discards_the_redo_future() {
    let mut layout = single_layer_layout(2, 2);
    let mut history = History::new();

    layout
        .set(&mut history, overwrite(pack(1, 0, 0, 255), None))
        .unwrap();
    layout
        .set(&mut history, overwrite(pack(2, 0, 0, 255), None))
        .unwrap();
    layout.undo(&mut history).unwrap();

    layout
        .set(&mut history, overwrite(pack(3, 0, 0, 255), None))
        .unwrap();
    assert!(!history.can_redo());
    assert!(!layout.redo(&mut history).unwrap());
    assert!(
        layout
            .image_data(None)
            .iter()
            .all(|&c| c == pack(3, 0, 0, 255))
    );
}

#[test]
fn plotted_stroke_undoes_as_one_session() {
    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();
    let red = pack(255, 0, 0, 255);

    // One stroke touching three cells, recorded as a single session.
    layout
        .set_indexes(
            &mut history,
            SetIndexesOp {
                indexes: &[0, 5, 10],
                color: red,
                blend: BlendMode::Overwrite,
                notify: false,
            },
        )
        .unwrap();
    assert_eq!(
        layout.image_data(None).iter().filter(|&&c| c == red).count(),
        3
    );

    assert!(layout.undo(&mut history).unwrap());
    assert!(layout.image_data(None).iter().all(|&c| c == 0));
    assert!(!layout.undo(&mut history).unwrap());
}

#[test]
fn noop_fill_leaves_no_history_behind() {
    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();

    let changed = layout
        .fill(
            &mut history,
            FillOp {
                seed: Point::new(0, 0),
                color: 0,
                region: None,
                blend: BlendMode::Overwrite,
                notify: false,
            },
        )
        .unwrap();
    assert!(!changed);
    assert!(history.is_empty());
    assert!(!layout.undo(&mut history).unwrap());
}

#[test]
fn undo_after_layer_deletion_is_silent() {
    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();

    layout
        .set(&mut history, overwrite(pack(5, 5, 5, 255), None))
        .unwrap();
    layout.delete_layer().unwrap();

    // The recorded session points at a destroyed layer; undo drops it
    // rather than rewriting freed pixels.
    assert!(!layout.undo(&mut history).unwrap());
    assert!(history.is_empty());
}

#[test]
fn destroy_purges_history() {
    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();

    layout
        .set(&mut history, overwrite(pack(5, 5, 5, 255), None))
        .unwrap();
    assert!(history.can_undo());

    layout.destroy(&mut history);
    assert!(history.is_empty());
    assert!(!history.can_undo());
    assert!(!history.can_redo());
}

#[test]
fn undo_recomposites_and_notifies() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut layout = single_layer_layout(4, 4);
    let mut history = History::new();
    layout
        .set(&mut history, overwrite(pack(1, 1, 1, 255), None))
        .unwrap();

    let count = Rc::new(RefCell::new(0u32));
    let sink = Rc::clone(&count);
    layout.events().subscribe(move |_| *sink.borrow_mut() += 1);

    assert!(layout.undo(&mut history).unwrap());
    assert_eq!(*count.borrow(), 1);
    assert!(layout.image_data(None).iter().all(|&c| c == 0));
}
