use state_machines::state_machine;

state_machine! {
    name: QueryExchangeMachine,
    state: QueryExchangeState,
    initial: Idle,
    states: [Idle, AwaitingGeneration, Decorating, Complete, Errored],
    events {
        accept { transition: { from: Idle, to: AwaitingGeneration } }
        generated { transition: { from: AwaitingGeneration, to: Decorating } }
        decorated { transition: { from: Decorating, to: Complete } }
        fail {
            transition: { from: AwaitingGeneration, to: Errored }
            transition: { from: Decorating, to: Errored }
        }
    }
}

pub fn idle() -> QueryExchangeMachine<(), Idle> {
    QueryExchangeMachine::new(())
}
