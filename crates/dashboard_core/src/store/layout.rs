use std::collections::HashMap;

use shared::domain::{DashboardLayout, LayoutItem, LayoutSection, ObjRef, SectionHeader, Widget};

use super::{existing_position, insert_position};
use crate::error::{CommandError, StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidgetPosition {
    pub section: usize,
    pub item: usize,
}

/// Layout tree plus a widgets-by-ref index rebuilt on every structural change.
#[derive(Debug, Clone, Default)]
pub struct LayoutState {
    layout: DashboardLayout,
    index: HashMap<ObjRef, WidgetPosition>,
}

impl LayoutState {
    pub fn new(layout: DashboardLayout) -> Result<Self, StateError> {
        let mut index = HashMap::new();
        for (section_index, section) in layout.sections.iter().enumerate() {
            for (item_index, item) in section.items.iter().enumerate() {
                let position = WidgetPosition {
                    section: section_index,
                    item: item_index,
                };
                if index.insert(item.widget.widget_ref.clone(), position).is_some() {
                    return Err(StateError::DuplicateWidget(item.widget.widget_ref.clone()));
                }
            }
        }
        Ok(Self { layout, index })
    }

    pub fn layout(&self) -> &DashboardLayout {
        &self.layout
    }

    pub fn contains(&self, widget_ref: &ObjRef) -> bool {
        self.index.contains_key(widget_ref)
    }

    pub fn position(&self, widget_ref: &ObjRef) -> Option<WidgetPosition> {
        self.index.get(widget_ref).copied()
    }

    pub fn widget(&self, widget_ref: &ObjRef) -> Option<&Widget> {
        let position = self.index.get(widget_ref)?;
        self.layout
            .sections
            .get(position.section)?
            .items
            .get(position.item)
            .map(|item| &item.widget)
    }

    pub fn widget_refs(&self) -> impl Iterator<Item = &ObjRef> {
        self.layout.widgets().map(|widget| &widget.widget_ref)
    }

    pub(crate) fn replace_widget(&mut self, widget: Widget) -> Result<(), StateError> {
        let position = self
            .position(&widget.widget_ref)
            .ok_or_else(|| StateError::UnknownWidget(widget.widget_ref.clone()))?;
        let slot = self
            .layout
            .sections
            .get_mut(position.section)
            .and_then(|section| section.items.get_mut(position.item))
            .ok_or_else(|| StateError::UnknownWidget(widget.widget_ref.clone()))?;
        slot.widget = widget;
        Ok(())
    }
}

fn section_mut(layout: &mut DashboardLayout, index: usize) -> Result<&mut LayoutSection, CommandError> {
    let len = layout.sections.len();
    layout
        .sections
        .get_mut(index)
        .ok_or_else(|| CommandError::invalid(format!("section index {index} out of range (0..{len})")))
}

pub(crate) fn add_section(
    layout: &mut DashboardLayout,
    index: i32,
    section: LayoutSection,
) -> Result<usize, CommandError> {
    let position = insert_position(index, layout.sections.len())
        .ok_or_else(|| CommandError::invalid(format!("cannot insert section at index {index}")))?;
    layout.sections.insert(position, section);
    Ok(position)
}

pub(crate) fn move_section(
    layout: &mut DashboardLayout,
    from: usize,
    to: i32,
) -> Result<usize, CommandError> {
    if from >= layout.sections.len() {
        return Err(CommandError::invalid(format!(
            "section index {from} out of range"
        )));
    }
    let target = existing_position(to, layout.sections.len())
        .ok_or_else(|| CommandError::invalid(format!("cannot move section to index {to}")))?;
    if from == target {
        return Err(CommandError::invalid(format!(
            "section {from} is already at index {target}"
        )));
    }
    let section = layout.sections.remove(from);
    layout.sections.insert(target, section);
    Ok(target)
}

pub(crate) fn remove_section(
    layout: &mut DashboardLayout,
    index: i32,
) -> Result<(usize, LayoutSection), CommandError> {
    let position = existing_position(index, layout.sections.len())
        .ok_or_else(|| CommandError::invalid(format!("no section at index {index}")))?;
    Ok((position, layout.sections.remove(position)))
}

pub(crate) fn change_section_header(
    layout: &mut DashboardLayout,
    index: usize,
    header: SectionHeader,
    merge: bool,
) -> Result<SectionHeader, CommandError> {
    let section = section_mut(layout, index)?;
    let next = if merge {
        let current = section.header.clone().unwrap_or_default();
        SectionHeader {
            title: header.title.or(current.title),
            description: header.description.or(current.description),
        }
    } else {
        header
    };
    section.header = Some(next.clone());
    Ok(next)
}

pub(crate) fn add_items(
    layout: &mut DashboardLayout,
    section_index: usize,
    item_index: i32,
    items: Vec<LayoutItem>,
) -> Result<usize, CommandError> {
    if items.is_empty() {
        return Err(CommandError::invalid("no items to add"));
    }
    let section = section_mut(layout, section_index)?;
    let position = insert_position(item_index, section.items.len()).ok_or_else(|| {
        CommandError::invalid(format!(
            "cannot insert items at index {item_index} of section {section_index}"
        ))
    })?;
    section.items.splice(position..position, items);
    Ok(position)
}

pub(crate) fn move_item(
    layout: &mut DashboardLayout,
    from: WidgetPosition,
    to_section: usize,
    to_item: i32,
) -> Result<usize, CommandError> {
    if to_section >= layout.sections.len() {
        return Err(CommandError::invalid(format!(
            "target section index {to_section} out of range"
        )));
    }
    let source = section_mut(layout, from.section)?;
    if from.item >= source.items.len() {
        return Err(CommandError::invalid(format!(
            "no item at index {} of section {}",
            from.item, from.section
        )));
    }
    let item = source.items.remove(from.item);

    let target = section_mut(layout, to_section)?;
    let Some(position) = insert_position(to_item, target.items.len()) else {
        // restore before reporting
        let source = section_mut(layout, from.section)?;
        source.items.insert(from.item, item);
        return Err(CommandError::invalid(format!(
            "cannot move item to index {to_item} of section {to_section}"
        )));
    };
    target.items.insert(position, item);
    Ok(position)
}

pub(crate) fn remove_item(
    layout: &mut DashboardLayout,
    section_index: usize,
    item_index: i32,
) -> Result<(usize, LayoutItem), CommandError> {
    let section = section_mut(layout, section_index)?;
    let position = existing_position(item_index, section.items.len()).ok_or_else(|| {
        CommandError::invalid(format!(
            "no item at index {item_index} of section {section_index}"
        ))
    })?;
    Ok((position, section.items.remove(position)))
}

pub(crate) fn replace_item(
    layout: &mut DashboardLayout,
    section_index: usize,
    item_index: usize,
    item: LayoutItem,
) -> Result<LayoutItem, CommandError> {
    let section = section_mut(layout, section_index)?;
    let slot = section.items.get_mut(item_index).ok_or_else(|| {
        CommandError::invalid(format!(
            "no item at index {item_index} of section {section_index}"
        ))
    })?;
    Ok(std::mem::replace(slot, item))
}
