use shared::protocol::EventBody;

use super::{HandlerContext, Outcome};
use crate::{render::ResolveOutcome, store::StateMutation};

// Render bookkeeping never fails a command; rejected registrations are reported as ignored.

pub fn request(ctx: &mut HandlerContext<'_>, id: String) -> Outcome {
    match ctx.render.request(&id, ctx.now) {
        Ok(()) => Outcome::event(EventBody::AsyncRenderRequested { id })
            .with_mutation(StateMutation::SetRenderProgress(ctx.render.snapshot())),
        Err(reason) => Outcome::event(EventBody::AsyncRenderIgnored { id, reason }),
    }
}

pub fn resolve(ctx: &mut HandlerContext<'_>, id: String) -> Outcome {
    match ctx.render.resolve(&id, ctx.now) {
        ResolveOutcome::Resolved(completion) => {
            let mut outcome = Outcome::event(EventBody::AsyncRenderResolved { id })
                .with_mutation(StateMutation::SetRenderProgress(ctx.render.snapshot()));
            if let Some(completion) = completion {
                outcome.events.push(EventBody::RenderResolved {
                    reason: completion.reason,
                    outstanding: completion.outstanding,
                });
            }
            outcome
        }
        ResolveOutcome::Ignored(reason) => Outcome::event(EventBody::AsyncRenderIgnored { id, reason }),
    }
}
