//! Location tagging through composed components, ending in stamped actions
//! observed by post-dispatch listeners.

use std::cell::RefCell;
use std::rc::Rc;

use familiar_analytics::{
    component_fn, tag_location, Action, ActionCallback, BindLocation, Component, Dispatch, DispatchPipeline,
    LocationContext, LocationPath, ReducerStore, TaggedProps,
};

/// Props of a product card: one "add to cart" button
struct CardProps {
    on_add: ActionCallback<u32>,
}

impl BindLocation for CardProps {
    fn bind_location(self, path: &LocationPath) -> Self {
        Self {
            on_add: self.on_add.bind_location(path),
        }
    }
}

type Locations = Rc<RefCell<Vec<Option<String>>>>;

/// A cart pipeline whose post-listener records the location of every add
fn cart_pipeline() -> (Rc<DispatchPipeline<ReducerStore<Vec<u32>>>>, Locations) {
    let mut pipeline = DispatchPipeline::new(ReducerStore::new(Vec::new(), |cart: &Vec<u32>, action: &Action| {
        let mut cart = cart.clone();
        if let Some(sku) = action.payload.as_u64() {
            cart.push(sku as u32);
        }
        cart
    }));

    let locations: Locations = Rc::default();
    let sink = Rc::clone(&locations);
    pipeline.add_post_dispatch_listeners("ADD_TO_CART", move |_, _, location, _| {
        sink.borrow_mut().push(location.map(ToString::to_string));
        Ok(())
    });

    (Rc::new(pipeline), locations)
}

fn add_to_cart(dispatcher: Rc<dyn Dispatch>) -> ActionCallback<u32> {
    ActionCallback::new(dispatcher, |sku| Action::new("ADD_TO_CART").with_payload(sku))
}

#[test]
fn test_card_inside_page_produces_joined_path() {
    let (pipeline, locations) = cart_pipeline();

    let card = Rc::new(tag_location("Card")(component_fn(
        |props: CardProps, _: &LocationContext| props.on_add,
    )));
    let page = {
        let card = Rc::clone(&card);
        tag_location("Page")(component_fn(move |props: CardProps, ctx: &LocationContext| {
            card.render(TaggedProps::new(props), ctx)
        }))
    };

    let button = page.render(
        TaggedProps::new(CardProps {
            on_add: add_to_cart(pipeline.clone()),
        }),
        &LocationContext::root(),
    );
    button.fire(7);

    assert_eq!(*locations.borrow(), vec![Some("Page > Card".to_string())]);
    assert_eq!(pipeline.get_state(), vec![7]);
}

#[test]
fn test_override_replaces_only_its_own_segment() {
    let (pipeline, locations) = cart_pipeline();

    let card = Rc::new(tag_location("Card")(component_fn(
        |props: CardProps, _: &LocationContext| props.on_add,
    )));
    let page = {
        let card = Rc::clone(&card);
        tag_location("Page")(component_fn(move |props: CardProps, ctx: &LocationContext| {
            card.render(TaggedProps::new(props).with_override("Special Card"), ctx)
        }))
    };

    let button = page.render(
        TaggedProps::new(CardProps {
            on_add: add_to_cart(pipeline.clone()),
        }),
        &LocationContext::root(),
    );
    button.fire(1);

    assert_eq!(*locations.borrow(), vec![Some("Page > Special Card".to_string())]);
}

#[test]
fn test_untagged_components_contribute_no_segment() {
    let (pipeline, locations) = cart_pipeline();

    let card = Rc::new(tag_location("Card")(component_fn(
        |props: CardProps, _: &LocationContext| props.on_add,
    )));
    // Grid and Section are plain components between the two tagged ones
    let grid = {
        let card = Rc::clone(&card);
        Rc::new(component_fn(move |props: CardProps, ctx: &LocationContext| {
            card.render(TaggedProps::new(props), ctx)
        }))
    };
    let section = {
        let grid = Rc::clone(&grid);
        component_fn(move |props: CardProps, ctx: &LocationContext| grid.render(props, ctx))
    };
    let page = tag_location("Page")(section);

    let button = page.render(
        TaggedProps::new(CardProps {
            on_add: add_to_cart(pipeline.clone()),
        }),
        &LocationContext::root(),
    );
    button.fire(3);

    assert_eq!(*locations.borrow(), vec![Some("Page > Card".to_string())]);
}

#[test]
fn test_component_testable_with_arbitrary_ancestor_stack() {
    let (pipeline, locations) = cart_pipeline();

    let card = tag_location("Card")(component_fn(|props: CardProps, _: &LocationContext| props.on_add));
    let button = card.render(
        TaggedProps::new(CardProps {
            on_add: add_to_cart(pipeline.clone()),
        }),
        &LocationContext::from_names(["Checkout", "Upsell"]),
    );
    button.fire(9);

    assert_eq!(*locations.borrow(), vec![Some("Checkout > Upsell > Card".to_string())]);
}

#[test]
fn test_callback_outside_tagged_tree_dispatches_without_location() {
    let (pipeline, locations) = cart_pipeline();

    add_to_cart(pipeline.clone()).fire(5);

    assert_eq!(*locations.borrow(), vec![None]);
    assert_eq!(pipeline.get_state(), vec![5]);
}

#[test]
fn test_sibling_cards_get_independent_paths() {
    let (pipeline, locations) = cart_pipeline();

    let card = Rc::new(tag_location("Card")(component_fn(
        |props: CardProps, _: &LocationContext| props.on_add,
    )));
    let page = {
        let card = Rc::clone(&card);
        tag_location("Page")(component_fn(move |props: CardProps, ctx: &LocationContext| {
            let featured = card.render(
                TaggedProps::new(CardProps {
                    on_add: props.on_add.clone(),
                })
                .with_override("Featured"),
                ctx,
            );
            let regular = card.render(TaggedProps::new(props), ctx);
            vec![featured, regular]
        }))
    };

    let buttons = page.render(
        TaggedProps::new(CardProps {
            on_add: add_to_cart(pipeline.clone()),
        }),
        &LocationContext::root(),
    );
    for (sku, button) in buttons.iter().enumerate() {
        button.fire(sku as u32);
    }

    assert_eq!(
        *locations.borrow(),
        vec![Some("Page > Featured".to_string()), Some("Page > Card".to_string())]
    );
}
