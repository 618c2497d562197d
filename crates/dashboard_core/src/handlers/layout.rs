use std::collections::HashMap;

use shared::{
    domain::{DashboardLayout, LayoutItem, LayoutSection, ObjRef, SectionHeader, Widget},
    protocol::{EventBody, UndoPoint},
};

use super::{HandlerContext, Outcome};
use crate::{
    error::CommandError,
    store::{layout as reducers, StateMutation, UndoEntry, UndoState, WidgetPosition},
    validation,
};

/// Records an undo snapshot, installs `layout`, and drops executions of `removed` widgets.
fn layout_change(
    ctx: &mut HandlerContext<'_>,
    layout: DashboardLayout,
    removed: Vec<ObjRef>,
    event: EventBody,
) -> Outcome {
    let mut outcome = Outcome::event(event)
        .with_mutation(ctx.record_undo())
        .with_mutation(StateMutation::SetLayout(layout));
    if !removed.is_empty() {
        let invalidate = ctx.invalidate_executions(Some(removed));
        outcome.mutations.push(invalidate);
    }
    outcome
}

fn working_layout(ctx: &HandlerContext<'_>) -> DashboardLayout {
    ctx.state.layout.layout().clone()
}

pub fn add_section(
    ctx: &mut HandlerContext<'_>,
    index: i32,
    header: Option<SectionHeader>,
    items: Vec<LayoutItem>,
) -> Result<Outcome, CommandError> {
    validation::validate_new_items(&ctx.state.layout, &items, None)?;
    let section = LayoutSection { header, items };
    let mut layout = working_layout(ctx);
    let index = reducers::add_section(&mut layout, index, section.clone())?;
    Ok(layout_change(
        ctx,
        layout,
        Vec::new(),
        EventBody::LayoutSectionAdded { index, section },
    ))
}

pub fn move_section(
    ctx: &mut HandlerContext<'_>,
    section_index: usize,
    to_index: i32,
) -> Result<Outcome, CommandError> {
    let mut layout = working_layout(ctx);
    let to_index = reducers::move_section(&mut layout, section_index, to_index)?;
    Ok(layout_change(
        ctx,
        layout,
        Vec::new(),
        EventBody::LayoutSectionMoved {
            from_index: section_index,
            to_index,
        },
    ))
}

pub fn remove_section(ctx: &mut HandlerContext<'_>, index: i32) -> Result<Outcome, CommandError> {
    let mut layout = working_layout(ctx);
    let (index, section) = reducers::remove_section(&mut layout, index)?;
    let removed = section
        .items
        .iter()
        .map(|item| item.widget.widget_ref.clone())
        .collect();
    Ok(layout_change(
        ctx,
        layout,
        removed,
        EventBody::LayoutSectionRemoved { index, section },
    ))
}

pub fn change_section_header(
    ctx: &mut HandlerContext<'_>,
    index: usize,
    header: SectionHeader,
    merge: bool,
) -> Result<Outcome, CommandError> {
    let mut layout = working_layout(ctx);
    let header = reducers::change_section_header(&mut layout, index, header, merge)?;
    Ok(layout_change(
        ctx,
        layout,
        Vec::new(),
        EventBody::LayoutSectionHeaderChanged { index, header },
    ))
}

pub fn add_items(
    ctx: &mut HandlerContext<'_>,
    section_index: usize,
    item_index: i32,
    items: Vec<LayoutItem>,
) -> Result<Outcome, CommandError> {
    validation::validate_new_items(&ctx.state.layout, &items, None)?;
    let mut layout = working_layout(ctx);
    let start_index = reducers::add_items(&mut layout, section_index, item_index, items.clone())?;
    Ok(layout_change(
        ctx,
        layout,
        Vec::new(),
        EventBody::LayoutSectionItemsAdded {
            section_index,
            start_index,
            items,
        },
    ))
}

pub fn move_item(
    ctx: &mut HandlerContext<'_>,
    section_index: usize,
    item_index: usize,
    to_section_index: usize,
    to_item_index: i32,
) -> Result<Outcome, CommandError> {
    let widget_ref = ctx
        .state
        .layout
        .layout()
        .sections
        .get(section_index)
        .and_then(|section| section.items.get(item_index))
        .map(|item| item.widget.widget_ref.clone())
        .ok_or_else(|| {
            CommandError::invalid(format!(
                "no item at index {item_index} of section {section_index}"
            ))
        })?;
    let mut layout = working_layout(ctx);
    let from = WidgetPosition {
        section: section_index,
        item: item_index,
    };
    let to_item_index = reducers::move_item(&mut layout, from, to_section_index, to_item_index)?;
    Ok(layout_change(
        ctx,
        layout,
        Vec::new(),
        EventBody::LayoutSectionItemMoved {
            from_section_index: section_index,
            from_item_index: item_index,
            to_section_index,
            to_item_index,
            widget_ref,
        },
    ))
}

pub fn remove_item(
    ctx: &mut HandlerContext<'_>,
    section_index: usize,
    item_index: i32,
) -> Result<Outcome, CommandError> {
    let mut layout = working_layout(ctx);
    let (item_index, item) = reducers::remove_item(&mut layout, section_index, item_index)?;
    let removed = vec![item.widget.widget_ref.clone()];
    Ok(layout_change(
        ctx,
        layout,
        removed,
        EventBody::LayoutSectionItemRemoved {
            section_index,
            item_index,
            item,
        },
    ))
}

pub fn replace_item(
    ctx: &mut HandlerContext<'_>,
    section_index: usize,
    item_index: usize,
    item: LayoutItem,
) -> Result<Outcome, CommandError> {
    let mut layout = working_layout(ctx);
    let current = layout
        .sections
        .get(section_index)
        .and_then(|section| section.items.get(item_index))
        .map(|item| item.widget.widget_ref.clone())
        .ok_or_else(|| {
            CommandError::invalid(format!(
                "no item at index {item_index} of section {section_index}"
            ))
        })?;
    validation::validate_new_items(&ctx.state.layout, std::slice::from_ref(&item), Some(&current))?;
    let previous = reducers::replace_item(&mut layout, section_index, item_index, item.clone())?;
    Ok(layout_change(
        ctx,
        layout,
        vec![current],
        EventBody::LayoutSectionItemReplaced {
            section_index,
            item_index,
            item,
            previous,
        },
    ))
}

/// Widgets whose definition differs between the two layouts, including removed ones.
fn changed_widgets(before: &DashboardLayout, after: &DashboardLayout) -> Vec<ObjRef> {
    let after: HashMap<&ObjRef, &Widget> = after
        .widgets()
        .map(|widget| (&widget.widget_ref, widget))
        .collect();
    before
        .widgets()
        .filter(|widget| after.get(&widget.widget_ref).copied() != Some(*widget))
        .map(|widget| widget.widget_ref.clone())
        .collect()
}

fn restore(
    ctx: &mut HandlerContext<'_>,
    history: UndoState,
    layout: DashboardLayout,
    event: EventBody,
) -> Outcome {
    let changed = changed_widgets(ctx.state.layout.layout(), &layout);
    let mut outcome = Outcome::event(event)
        .with_mutation(StateMutation::SetUndoHistory(history))
        .with_mutation(StateMutation::SetLayout(layout));
    if !changed.is_empty() {
        let invalidate = ctx.invalidate_executions(Some(changed));
        outcome.mutations.push(invalidate);
    }
    outcome
}

pub fn undo(ctx: &mut HandlerContext<'_>, undo_point: UndoPoint) -> Result<Outcome, CommandError> {
    let mut history = ctx.state.undo.clone();
    let available = history.undo.len();
    if available == 0 {
        return Err(CommandError::invalid("there are no layout changes to undo"));
    }
    let steps = match &undo_point {
        UndoPoint::Last => 1,
        UndoPoint::Steps(steps) if (1..=available).contains(steps) => *steps,
        UndoPoint::Steps(steps) => {
            return Err(CommandError::invalid(format!(
                "cannot undo {steps} changes; {available} recorded"
            )))
        }
        UndoPoint::Correlation(correlation_id) => {
            let position = history
                .undo
                .iter()
                .rposition(|entry| entry.correlation_id.as_ref() == Some(correlation_id))
                .ok_or_else(|| {
                    CommandError::invalid(format!("no undoable change made by {correlation_id}"))
                })?;
            available - position
        }
    };

    // each undone entry holds the layout before its change; redo needs the layout after it
    let mut after = ctx.state.layout.layout().clone();
    for _ in 0..steps {
        let Some(entry) = history.undo.pop() else {
            break;
        };
        let before = entry.layout.clone();
        history.redo.push(UndoEntry {
            layout: after,
            ..entry
        });
        after = before;
    }
    Ok(restore(
        ctx,
        history,
        after,
        EventBody::LayoutChangesUndone { steps },
    ))
}

pub fn redo(ctx: &mut HandlerContext<'_>) -> Result<Outcome, CommandError> {
    let mut history = ctx.state.undo.clone();
    let entry = history
        .redo
        .pop()
        .ok_or_else(|| CommandError::invalid("there are no layout changes to redo"))?;
    let layout = entry.layout.clone();
    history.undo.push(UndoEntry {
        layout: ctx.state.layout.layout().clone(),
        ..entry
    });
    Ok(restore(ctx, history, layout, EventBody::LayoutChangesRedone))
}

#[cfg(test)]
#[path = "../tests/layout_handlers_tests.rs"]
mod tests;
